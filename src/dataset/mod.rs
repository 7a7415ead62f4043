//! Datasets of graph pairs and triplets for similarity learning.
//!
//! Pairs are packed as (x_1, y_1, x_2, y_2, ...) with labels +1 (similar) or -1 (dissimilar).
//! Triplets (x, y, z), y being closer to x than z, are packed as (x, y, x, z, ...).
//!
//! - ged : synthetic Erdos-Renyi graphs
//! - kg : caller supplied graphs with labelled nodes, features taken from a label embedding

pub mod ged;
pub mod kg;

use anyhow::anyhow;

use ndarray::Array1;

use crate::graph::graphdata::GraphData;
use crate::nn::real::Real;

pub use ged::{FixedGraphEditDistanceDataset, GraphEditDistanceDataset};
pub use kg::{FixedKnowledgeGraphDataset, KnowledgeGraphEditDistanceDataset, LabelEmbedding, LabeledGraph, TestKnowledgeGraphDataset};

/// default seed of fixed datasets
pub const FIXED_DATASET_SEED: u64 = 1234;

pub trait GraphSimilarityDataset {
    /// batch_size pairs, that is 2 * batch_size graphs, and their labels
    fn pair_batch<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<(GraphData<F>, Array1<F>)>;

    /// batch_size triplets, that is 4 * batch_size graphs
    fn triplet_batch<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<GraphData<F>>;
}

/// Draws pairs and triplets by edge substitutions of a source graph and packs them with their features.
pub trait EditDistanceSampler {
    type Graph: Clone;

    /// a similar pair if positive, a dissimilar pair otherwise
    fn get_pair(&mut self, positive: bool) -> anyhow::Result<(Self::Graph, Self::Graph)>;

    /// (g1, g2, g3) with g2 closer to g1 than g3
    fn get_triplet(&mut self) -> anyhow::Result<(Self::Graph, Self::Graph, Self::Graph)>;

    /// packs graphs in the given order
    fn pack<F: Real>(&self, graphs: &[&Self::Graph]) -> anyhow::Result<GraphData<F>>;

    /// restarts the random generator
    fn reseed(&mut self, seed: u64);

    /// packs pairs (g1, g2) as g1, g2, g1', g2' ...
    fn pack_pairs<F: Real>(&self, pairs: &[(Self::Graph, Self::Graph)]) -> anyhow::Result<GraphData<F>> {
        let graphs: Vec<&Self::Graph> = pairs.iter().flat_map(|(a, b)| [a, b]).collect();
        self.pack(&graphs)
    }

    /// packs triplets (g1, g2, g3) as g1, g2, g1, g3 ...
    fn pack_triplets<F: Real>(&self, triplets: &[(Self::Graph, Self::Graph, Self::Graph)]) -> anyhow::Result<GraphData<F>> {
        let graphs: Vec<&Self::Graph> = triplets.iter().flat_map(|(a, b, c)| [a, b, a, c]).collect();
        self.pack(&graphs)
    }
} // end of trait EditDistanceSampler

/// +1 for a similar pair, -1 otherwise
fn labels_of<F: Real>(similar: &[bool]) -> Array1<F> {
    similar.iter().map(|s| if *s { F::one() } else { -F::one() }).collect()
}

/// labels alternate +1, -1, +1 ... starting with a similar pair
pub(crate) fn alternate_similar(nb: usize) -> Vec<bool> {
    (0..nb).map(|i| i % 2 == 0).collect()
}

impl<S: EditDistanceSampler> GraphSimilarityDataset for S {
    fn pair_batch<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<(GraphData<F>, Array1<F>)> {
        let similar = alternate_similar(batch_size);
        let mut pairs = Vec::with_capacity(batch_size);
        for positive in &similar {
            pairs.push(self.get_pair(*positive)?);
        }
        Ok((self.pack_pairs(&pairs)?, labels_of(&similar)))
    }

    fn triplet_batch<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<GraphData<F>> {
        let mut triplets = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            triplets.push(self.get_triplet()?);
        }
        self.pack_triplets(&triplets)
    }
} // end of impl GraphSimilarityDataset

//==================================================================================

/// A fixed set of pairs and triplets, generated once from a seed.
/// Used for evaluation so that results are comparable between runs.
/// Pair labels are drawn with the pairs over the whole set, a batch gets the labels of its own pairs.
pub struct FixedDataset<S: EditDistanceSampler> {
    sampler: S,
    dataset_size: usize,
    seed: u64,
    pairs: Option<Vec<(S::Graph, S::Graph)>>,
    /// similar flag of each pair
    similar: Vec<bool>,
    triplets: Option<Vec<(S::Graph, S::Graph, S::Graph)>>,
} // end of FixedDataset

impl<S: EditDistanceSampler> FixedDataset<S> {
    pub fn from_sampler(sampler: S, dataset_size: usize, seed: u64) -> Self {
        FixedDataset { sampler, dataset_size, seed, pairs: None, similar: Vec::new(), triplets: None }
    }

    pub fn get_dataset_size(&self) -> usize {
        self.dataset_size
    }

    pub fn get_sampler(&self) -> &S {
        &self.sampler
    }

    fn check_batch_size(batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            log::error!("fixed dataset : batch_size must be positive");
            return Err(anyhow!("fixed dataset : batch_size must be positive"));
        }
        Ok(())
    }

    // the generator restarts from seed, so pairs and triplets do not depend on call order
    fn generate_pairs(&mut self) -> anyhow::Result<()> {
        if self.pairs.is_some() {
            return Ok(());
        }
        self.sampler.reseed(self.seed);
        let similar = alternate_similar(self.dataset_size);
        let mut pairs = Vec::with_capacity(self.dataset_size);
        for positive in &similar {
            pairs.push(self.sampler.get_pair(*positive)?);
        }
        log::debug!("fixed dataset : generated {} pairs", pairs.len());
        self.pairs = Some(pairs);
        self.similar = similar;
        Ok(())
    }

    fn generate_triplets(&mut self) -> anyhow::Result<()> {
        if self.triplets.is_some() {
            return Ok(());
        }
        self.sampler.reseed(self.seed);
        let mut triplets = Vec::with_capacity(self.dataset_size);
        for _ in 0..self.dataset_size {
            triplets.push(self.sampler.get_triplet()?);
        }
        log::debug!("fixed dataset : generated {} triplets", triplets.len());
        self.triplets = Some(triplets);
        Ok(())
    }

    /// all complete batches of pairs with their labels, the same on every call
    pub fn pair_batches<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<Vec<(GraphData<F>, Array1<F>)>> {
        Self::check_batch_size(batch_size)?;
        self.generate_pairs()?;
        let mut batches = Vec::with_capacity(self.dataset_size / batch_size);
        if let Some(pairs) = &self.pairs {
            for (chunk, similar) in pairs.chunks_exact(batch_size).zip(self.similar.chunks_exact(batch_size)) {
                batches.push((self.sampler.pack_pairs(chunk)?, labels_of(similar)));
            }
        }
        Ok(batches)
    } // end of pair_batches

    /// all complete batches of triplets, the same on every call
    pub fn triplet_batches<F: Real>(&mut self, batch_size: usize) -> anyhow::Result<Vec<GraphData<F>>> {
        Self::check_batch_size(batch_size)?;
        self.generate_triplets()?;
        let mut batches = Vec::with_capacity(self.dataset_size / batch_size);
        if let Some(triplets) = &self.triplets {
            for chunk in triplets.chunks_exact(batch_size) {
                batches.push(self.sampler.pack_triplets(chunk)?);
            }
        }
        Ok(batches)
    } // end of triplet_batches

    /// the generated pairs, in order
    pub fn get_pairs(&mut self) -> anyhow::Result<&[(S::Graph, S::Graph)]> {
        self.generate_pairs()?;
        Ok(self.pairs.as_deref().unwrap_or(&[]))
    }
} // end of impl FixedDataset
