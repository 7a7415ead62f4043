//! Synthetic graph edit distance task.
//!
//! A graph G is sampled from the Erdos-Renyi model (retrying until it is connected), then
//! - a node permutation of G gives G1
//! - substituting k1 edges of G gives G2
//! - substituting k2 > k1 edges of G gives G3.
//!
//! The edit distance between G1 and G2 is then at most k1 and between G1 and G3 at most k2, so (G1, G2)
//! is a similar pair and (G1, G3) a dissimilar one.
//! Each substitution removes an existing edge and adds an edge absent from G.

use anyhow::anyhow;

use indexmap::IndexSet;
use petgraph::graph::{NodeIndex, UnGraph};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{EditDistanceSampler, FixedDataset};
use crate::graph::graphdata::GraphData;
use crate::model::config::DatasetConfig;
use crate::nn::real::Real;

/// generated graphs carry no weight, features are set at packing
pub type PlainGraph = UnGraph<(), ()>;

/// number of samples tried to get a connected graph
const NB_CONNECTION_TRIALS: usize = 100;

fn graph_with_nodes<N>(weights: Vec<N>, edges: impl IntoIterator<Item = (usize, usize)>) -> UnGraph<N, ()> {
    let mut graph = UnGraph::<N, ()>::default();
    let nodes: Vec<NodeIndex> = weights.into_iter().map(|w| graph.add_node(w)).collect();
    for (a, b) in edges {
        graph.add_edge(nodes[a], nodes[b], ());
    }
    graph
}

fn node_weights<N: Clone>(graph: &UnGraph<N, ()>) -> Vec<N> {
    graph.raw_nodes().iter().map(|n| n.weight.clone()).collect()
}

// edge as (min, max)
pub(crate) fn normalized_edge(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// G(n,p) graph : each of the n(n-1)/2 pairs is an edge with probability p
pub fn erdos_renyi_graph(n: usize, p: f64, rng: &mut Xoshiro256PlusPlus) -> PlainGraph {
    let mut edges = Vec::<(usize, usize)>::new();
    for i in 0..n {
        for j in i + 1..n {
            if rng.gen::<f64>() < p {
                edges.push((i, j));
            }
        }
    }
    graph_with_nodes(vec![(); n], edges)
}

pub fn is_connected<N>(graph: &UnGraph<N, ()>) -> bool {
    graph.node_count() > 0 && petgraph::algo::connected_components(graph) == 1
}

/// samples G(n,p) graphs until one is connected, gives up after NB_CONNECTION_TRIALS samples
pub fn connected_erdos_renyi_graph(n: usize, p: f64, rng: &mut Xoshiro256PlusPlus) -> anyhow::Result<PlainGraph> {
    for _ in 0..NB_CONNECTION_TRIALS {
        let graph = erdos_renyi_graph(n, p, rng);
        if is_connected(&graph) {
            return Ok(graph);
        }
    }
    log::error!("failed to generate a connected graph with {} nodes and edge probability {}", n, p);
    Err(anyhow!("failed to generate a connected graph with {} nodes and edge probability {} in {} trials", n, p, NB_CONNECTION_TRIALS))
}

/// returns a copy of graph with nodes randomly renumbered, node weights follow their node
pub fn permute_graph_nodes<N: Clone>(graph: &UnGraph<N, ()>, rng: &mut Xoshiro256PlusPlus) -> UnGraph<N, ()> {
    let n = graph.node_count();
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    // node i becomes node perm[i]
    let mut inverse = vec![0usize; n];
    for (i, p) in perm.iter().enumerate() {
        inverse[*p] = i;
    }
    let nodes = graph.raw_nodes();
    let weights: Vec<N> = inverse.iter().map(|i| nodes[*i].weight.clone()).collect();
    let edges = graph.raw_edges().iter().map(|e| (perm[e.source().index()], perm[e.target().index()]));
    graph_with_nodes(weights, edges)
}

/// Substitutes nb_changes distinct edges of graph by nb_changes edges not present in graph.
/// Returns an error if graph has less than nb_changes edges or less than nb_changes missing edges.
pub fn substitute_random_edges<N: Clone>(graph: &UnGraph<N, ()>, nb_changes: usize, rng: &mut Xoshiro256PlusPlus) -> anyhow::Result<UnGraph<N, ()>> {
    let n = graph.node_count();
    let edges: IndexSet<(usize, usize)> = graph.raw_edges().iter().map(|e| normalized_edge(e.source().index(), e.target().index())).collect();
    let nb_missing = (n * n.saturating_sub(1) / 2).saturating_sub(edges.len());
    if nb_changes > edges.len() || nb_changes > nb_missing {
        log::error!("cannot substitute {} edges, graph has {} edges and {} missing edges", nb_changes, edges.len(), nb_missing);
        return Err(anyhow!("cannot substitute {} edges, graph has {} edges and {} missing edges", nb_changes, edges.len(), nb_missing));
    }
    let edge_list: Vec<(usize, usize)> = edges.iter().copied().collect();
    let removed: IndexSet<(usize, usize)> = edge_list.choose_multiple(rng, nb_changes).copied().collect();
    let mut added = IndexSet::<(usize, usize)>::with_capacity(nb_changes);
    while added.len() < nb_changes {
        let a = rng.gen_range(0..n);
        let b = rng.gen_range(0..n);
        if a == b {
            continue;
        }
        let e = normalized_edge(a, b);
        if !edges.contains(&e) {
            added.insert(e);
        }
    }
    let kept = edge_list.into_iter().filter(|e| !removed.contains(e));
    Ok(graph_with_nodes(node_weights(graph), kept.chain(added.into_iter())))
} // end of substitute_random_edges

//==================================================================================

/// Generates pairs and triplets on the fly.
pub struct GraphEditDistanceDataset {
    config: DatasetConfig,
    /// permute node ordering of the first graph of pairs and triplets
    permute: bool,
    rng: Xoshiro256PlusPlus,
} // end of GraphEditDistanceDataset

impl GraphEditDistanceDataset {
    pub fn new(config: &DatasetConfig, permute: bool, seed: u64) -> anyhow::Result<Self> {
        config.validate()?;
        let rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Ok(GraphEditDistanceDataset { config: config.clone(), permute, rng })
    }

    pub fn get_config(&self) -> &DatasetConfig {
        &self.config
    }

    fn get_graph(&mut self) -> anyhow::Result<PlainGraph> {
        let (n_min, n_max) = self.config.n_nodes_range;
        let (p_min, p_max) = self.config.p_edge_range;
        let n = self.rng.gen_range(n_min..=n_max);
        let p = if p_max > p_min { self.rng.gen_range(p_min..p_max) } else { p_min };
        connected_erdos_renyi_graph(n, p, &mut self.rng)
    }

    fn first_of(&mut self, graph: &PlainGraph) -> PlainGraph {
        if self.permute {
            permute_graph_nodes(graph, &mut self.rng)
        } else {
            graph.clone()
        }
    }
} // end of impl GraphEditDistanceDataset

impl EditDistanceSampler for GraphEditDistanceDataset {
    type Graph = PlainGraph;

    fn get_pair(&mut self, positive: bool) -> anyhow::Result<(PlainGraph, PlainGraph)> {
        let graph = self.get_graph()?;
        let first = self.first_of(&graph);
        let nb_changes = if positive { self.config.n_changes_positive } else { self.config.n_changes_negative };
        let changed = substitute_random_edges(&graph, nb_changes, &mut self.rng)?;
        Ok((first, changed))
    }

    fn get_triplet(&mut self) -> anyhow::Result<(PlainGraph, PlainGraph, PlainGraph)> {
        let graph = self.get_graph()?;
        let first = self.first_of(&graph);
        let positive = substitute_random_edges(&graph, self.config.n_changes_positive, &mut self.rng)?;
        let negative = substitute_random_edges(&graph, self.config.n_changes_negative, &mut self.rng)?;
        Ok((first, positive, negative))
    }

    /// all node and edge features set to 1
    fn pack<F: Real>(&self, graphs: &[&PlainGraph]) -> anyhow::Result<GraphData<F>> {
        GraphData::pack_graphs(graphs, self.config.node_feature_dim, self.config.edge_feature_dim)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    }
} // end of impl EditDistanceSampler for GraphEditDistanceDataset

//==================================================================================

/// fixed set of synthetic pairs and triplets
pub type FixedGraphEditDistanceDataset = FixedDataset<GraphEditDistanceDataset>;

impl FixedDataset<GraphEditDistanceDataset> {
    pub fn new(config: &DatasetConfig, permute: bool, dataset_size: usize, seed: u64) -> anyhow::Result<Self> {
        let sampler = GraphEditDistanceDataset::new(config, permute, seed)?;
        Ok(FixedDataset::from_sampler(sampler, dataset_size, seed))
    }
}

// end of mod tests
