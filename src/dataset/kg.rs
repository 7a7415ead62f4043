//! Edit distance task on caller supplied graphs.
//!
//! Graphs come from a knowledge base : each node carries a label, the feature vector of a node is the
//! embedding vector of its label. Pairs and triplets are built as for the synthetic task, the source graph
//! being drawn among the supplied graphs instead of generated. Edges carry no information, their features are set to 1.
//!
//! A test set is a list of graphs compared 2 by 2 : first with second, third with fourth ...

use anyhow::anyhow;

use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::graph::UnGraph;
use rand::seq::SliceRandom;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::ged::{permute_graph_nodes, substitute_random_edges};
use super::{EditDistanceSampler, FixedDataset};
use crate::graph::graphdata::GraphData;
use crate::nn::real::{real, Real};

/// node weight is the node label
pub type LabeledGraph = UnGraph<String, ()>;

/// dimension of edge features of knowledge graphs
pub const KG_EDGE_FEATURE_DIM: usize = 2;

/// Maps node labels to vectors of a fixed dimension.
#[derive(Clone, Debug)]
pub struct LabelEmbedding {
    dim: usize,
    vectors: IndexMap<String, Vec<f64>>,
}

impl LabelEmbedding {
    pub fn new(dim: usize) -> Self {
        LabelEmbedding { dim, vectors: IndexMap::new() }
    }

    /// adds or replaces the vector of label
    pub fn insert(&mut self, label: &str, vector: Vec<f64>) -> anyhow::Result<()> {
        if vector.len() != self.dim {
            log::error!("label embedding : vector of {} has length {}, expected {}", label, vector.len(), self.dim);
            return Err(anyhow!("label embedding : vector of {} has length {}, expected {}", label, vector.len(), self.dim));
        }
        self.vectors.insert(label.to_string(), vector);
        Ok(())
    }

    pub fn get_dim(&self) -> usize {
        self.dim
    }

    pub fn get_nb_labels(&self) -> usize {
        self.vectors.len()
    }

    pub fn get_embedding(&self, label: &str) -> Option<&[f64]> {
        self.vectors.get(label).map(|v| v.as_slice())
    }

    /// checks that every node label of graph has a vector
    pub fn check_graph(&self, graph: &LabeledGraph) -> anyhow::Result<()> {
        if let Some(node) = graph.raw_nodes().iter().find(|n| !self.vectors.contains_key(&n.weight)) {
            log::error!("label embedding has no vector for node label {}", node.weight);
            return Err(anyhow!("label embedding has no vector for node label {}", node.weight));
        }
        Ok(())
    }

    /// packs graphs, node features being the vectors of node labels
    pub fn pack<F: Real>(&self, graphs: &[&LabeledGraph]) -> anyhow::Result<GraphData<F>> {
        GraphData::pack_graphs_with(
            graphs,
            self.dim,
            KG_EDGE_FEATURE_DIM,
            |label: &String| self.get_embedding(label).map(|v| v.iter().map(|x| real::<F>(*x)).collect()).unwrap_or_default(),
            |_: &()| vec![F::one(); KG_EDGE_FEATURE_DIM],
        )
    }
} // end of impl LabelEmbedding

fn check_graphs(graphs: &[LabeledGraph], embedding: &LabelEmbedding) -> anyhow::Result<()> {
    if graphs.is_empty() {
        log::error!("knowledge graph dataset needs at least one graph");
        return Err(anyhow!("knowledge graph dataset needs at least one graph"));
    }
    for graph in graphs {
        embedding.check_graph(graph)?;
    }
    Ok(())
}

//==================================================================================

/// Generates pairs and triplets on the fly from randomly chosen graphs.
pub struct KnowledgeGraphEditDistanceDataset {
    graphs: Vec<LabeledGraph>,
    embedding: Arc<LabelEmbedding>,
    n_changes_positive: usize,
    n_changes_negative: usize,
    /// permute node ordering of the first graph of pairs and triplets
    permute: bool,
    rng: Xoshiro256PlusPlus,
} // end of KnowledgeGraphEditDistanceDataset

impl KnowledgeGraphEditDistanceDataset {
    pub fn new(
        graphs: Vec<LabeledGraph>,
        embedding: Arc<LabelEmbedding>,
        n_changes_positive: usize,
        n_changes_negative: usize,
        permute: bool,
        seed: u64,
    ) -> anyhow::Result<Self> {
        check_graphs(&graphs, &embedding)?;
        if n_changes_positive >= n_changes_negative {
            log::warn!("n_changes_positive {} not less than n_changes_negative {}", n_changes_positive, n_changes_negative);
        }
        log::info!("knowledge graph dataset : {} graphs, label embedding of dim {}", graphs.len(), embedding.get_dim());
        let rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Ok(KnowledgeGraphEditDistanceDataset { graphs, embedding, n_changes_positive, n_changes_negative, permute, rng })
    }

    pub fn get_nb_graphs(&self) -> usize {
        self.graphs.len()
    }

    /// node feature dimension of packed batches
    pub fn get_node_feature_dim(&self) -> usize {
        self.embedding.get_dim()
    }

    fn get_graph(&mut self) -> anyhow::Result<LabeledGraph> {
        self.graphs.choose(&mut self.rng).cloned().ok_or_else(|| anyhow!("knowledge graph dataset has no graph"))
    }

    fn first_of(&mut self, graph: &LabeledGraph) -> LabeledGraph {
        if self.permute {
            permute_graph_nodes(graph, &mut self.rng)
        } else {
            graph.clone()
        }
    }
} // end of impl KnowledgeGraphEditDistanceDataset

impl EditDistanceSampler for KnowledgeGraphEditDistanceDataset {
    type Graph = LabeledGraph;

    fn get_pair(&mut self, positive: bool) -> anyhow::Result<(LabeledGraph, LabeledGraph)> {
        let graph = self.get_graph()?;
        let first = self.first_of(&graph);
        let nb_changes = if positive { self.n_changes_positive } else { self.n_changes_negative };
        let changed = substitute_random_edges(&graph, nb_changes, &mut self.rng)?;
        Ok((first, changed))
    }

    fn get_triplet(&mut self) -> anyhow::Result<(LabeledGraph, LabeledGraph, LabeledGraph)> {
        let graph = self.get_graph()?;
        let first = self.first_of(&graph);
        let positive = substitute_random_edges(&graph, self.n_changes_positive, &mut self.rng)?;
        let negative = substitute_random_edges(&graph, self.n_changes_negative, &mut self.rng)?;
        Ok((first, positive, negative))
    }

    fn pack<F: Real>(&self, graphs: &[&LabeledGraph]) -> anyhow::Result<GraphData<F>> {
        self.embedding.pack(graphs)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    }
} // end of impl EditDistanceSampler for KnowledgeGraphEditDistanceDataset

/// fixed set of pairs and triplets drawn from knowledge graphs, nodes are not permuted
pub type FixedKnowledgeGraphDataset = FixedDataset<KnowledgeGraphEditDistanceDataset>;

impl FixedDataset<KnowledgeGraphEditDistanceDataset> {
    pub fn new(
        graphs: Vec<LabeledGraph>,
        embedding: Arc<LabelEmbedding>,
        n_changes_positive: usize,
        n_changes_negative: usize,
        dataset_size: usize,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let sampler = KnowledgeGraphEditDistanceDataset::new(graphs, embedding, n_changes_positive, n_changes_negative, false, seed)?;
        Ok(FixedDataset::from_sampler(sampler, dataset_size, seed))
    }
}

//==================================================================================

/// Pairs of graphs to score after training, graphs 2i and 2i+1 form pair i.
pub struct TestKnowledgeGraphDataset {
    graphs: Vec<LabeledGraph>,
    embedding: Arc<LabelEmbedding>,
}

impl TestKnowledgeGraphDataset {
    pub fn new(graphs: Vec<LabeledGraph>, embedding: Arc<LabelEmbedding>) -> anyhow::Result<Self> {
        check_graphs(&graphs, &embedding)?;
        if graphs.len() % 2 != 0 {
            log::error!("test pairs : odd number of graphs {}", graphs.len());
            return Err(anyhow!("test pairs need an even number of graphs, got {}", graphs.len()));
        }
        Ok(TestKnowledgeGraphDataset { graphs, embedding })
    }

    pub fn get_nb_pairs(&self) -> usize {
        self.graphs.len() / 2
    }

    pub fn get_node_feature_dim(&self) -> usize {
        self.embedding.get_dim()
    }

    /// all pairs in one batch
    pub fn pack_all<F: Real>(&self) -> anyhow::Result<GraphData<F>> {
        let graphs: Vec<&LabeledGraph> = self.graphs.iter().collect();
        self.embedding.pack(&graphs)
    }
} // end of impl TestKnowledgeGraphDataset

// end of mod tests
