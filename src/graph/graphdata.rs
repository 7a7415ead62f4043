//! Packed batch of graphs.
//!
//! Several graphs are stored as one big disconnected graph : nodes of all graphs are numbered
//! contiguously from 0, each node carries the index of the graph it belongs to.
//! Edges are directed (from, to) pairs. An undirected petgraph graph contributes each edge once,
//! the model can send messages along the reverse direction itself.
//!
//! Graphs compared with each other are packed consecutively : graphs 2i and 2i+1 form a pair.
//! Triplets (g1, g2, g3) are packed as (g1, g2, g1, g3).

use anyhow::anyhow;

use candle_core::{Device, Tensor};
use ndarray::{Array2, ArrayView2, Axis};
use petgraph::graph::{Graph, IndexType};
use petgraph::EdgeType;

use super::segment::Segments;
use crate::nn::real::Real;
use crate::nn::tensor::{array2_to_tensor, index_tensor};

#[derive(Clone, Debug)]
pub struct GraphData<F> {
    from_idx: Vec<usize>,
    to_idx: Vec<usize>,
    node_features: Array2<F>,
    edge_features: Option<Array2<F>>,
    /// graph of each node
    graph_idx: Vec<usize>,
    n_graphs: usize,
} // end of GraphData

impl<F: Real> GraphData<F> {
    /// builds a batch, checks that
    /// - edge endpoints are valid node indices
    /// - graph_idx covers exactly 0..n_graphs, each graph having at least one node
    /// - feature rows match node and edge counts
    pub fn new(
        from_idx: Vec<usize>,
        to_idx: Vec<usize>,
        node_features: Array2<F>,
        edge_features: Option<Array2<F>>,
        graph_idx: Vec<usize>,
        n_graphs: usize,
    ) -> anyhow::Result<Self> {
        let data = GraphData { from_idx, to_idx, node_features, edge_features, graph_idx, n_graphs };
        data.validate()?;
        Ok(data)
    } // end of new

    fn validate(&self) -> anyhow::Result<()> {
        let n_nodes = self.graph_idx.len();
        if self.node_features.nrows() != n_nodes {
            log::error!("GraphData : {} node feature rows for {} nodes", self.node_features.nrows(), n_nodes);
            return Err(anyhow!("GraphData : {} node feature rows for {} nodes", self.node_features.nrows(), n_nodes));
        }
        if self.from_idx.len() != self.to_idx.len() {
            log::error!("GraphData : from_idx has {} entries, to_idx {}", self.from_idx.len(), self.to_idx.len());
            return Err(anyhow!("GraphData : from_idx has {} entries, to_idx {}", self.from_idx.len(), self.to_idx.len()));
        }
        if let Some((e, (from, to))) = self
            .from_idx
            .iter()
            .zip(self.to_idx.iter())
            .enumerate()
            .find(|(_, (from, to))| **from >= n_nodes || **to >= n_nodes)
        {
            log::error!("GraphData : edge {} ({}, {}) out of range, nb nodes : {}", e, from, to, n_nodes);
            return Err(anyhow!("GraphData : edge {} ({}, {}) out of range, nb nodes : {}", e, from, to, n_nodes));
        }
        if let Some(edge_features) = &self.edge_features {
            if edge_features.nrows() != self.from_idx.len() {
                log::error!("GraphData : {} edge feature rows for {} edges", edge_features.nrows(), self.from_idx.len());
                return Err(anyhow!("GraphData : {} edge feature rows for {} edges", edge_features.nrows(), self.from_idx.len()));
            }
        }
        let mut counts = vec![0usize; self.n_graphs];
        for (node, g) in self.graph_idx.iter().enumerate() {
            if *g >= self.n_graphs {
                log::error!("GraphData : node {} has graph index {}, nb graphs : {}", node, g, self.n_graphs);
                return Err(anyhow!("GraphData : node {} has graph index {}, nb graphs : {}", node, g, self.n_graphs));
            }
            counts[*g] += 1;
        }
        if let Some(g) = counts.iter().position(|c| *c == 0) {
            log::error!("GraphData : graph {} has no node", g);
            return Err(anyhow!("GraphData : graph {} has no node", g));
        }
        Ok(())
    } // end of validate

    /// packs graphs with all node and edge features set to 1.
    /// An edge_feature_dim of 0 gives a batch without edge features.
    pub fn pack_graphs<N, E, Ty: EdgeType, Ix: IndexType>(
        graphs: &[&Graph<N, E, Ty, Ix>],
        node_feature_dim: usize,
        edge_feature_dim: usize,
    ) -> anyhow::Result<Self> {
        GraphData::pack_graphs_with(
            graphs,
            node_feature_dim,
            edge_feature_dim,
            |_: &N| vec![F::one(); node_feature_dim],
            |_: &E| vec![F::one(); edge_feature_dim],
        )
    }

    /// packs graphs, features are computed from node and edge weights.
    /// Edge endpoints of a graph are shifted by the number of nodes of the graphs packed before it.
    pub fn pack_graphs_with<N, E, Ty, Ix, FN, FE>(
        graphs: &[&Graph<N, E, Ty, Ix>],
        node_feature_dim: usize,
        edge_feature_dim: usize,
        node_features: FN,
        edge_features: FE,
    ) -> anyhow::Result<Self>
    where
        Ty: EdgeType,
        Ix: IndexType,
        FN: Fn(&N) -> Vec<F>,
        FE: Fn(&E) -> Vec<F>,
    {
        let n_nodes: usize = graphs.iter().map(|g| g.node_count()).sum();
        let n_edges: usize = graphs.iter().map(|g| g.edge_count()).sum();
        log::debug!("packing {} graphs, {} nodes, {} edges", graphs.len(), n_nodes, n_edges);
        //
        let mut from_idx = Vec::<usize>::with_capacity(n_edges);
        let mut to_idx = Vec::<usize>::with_capacity(n_edges);
        let mut graph_idx = Vec::<usize>::with_capacity(n_nodes);
        let mut node_values = Vec::<F>::with_capacity(n_nodes * node_feature_dim);
        let mut edge_values = Vec::<F>::with_capacity(n_edges * edge_feature_dim);
        let mut offset = 0usize;
        for (rank, graph) in graphs.iter().enumerate() {
            for node in graph.raw_nodes() {
                let features = node_features(&node.weight);
                if features.len() != node_feature_dim {
                    return Err(anyhow!("pack_graphs : node features of graph {} have length {}, expected {}", rank, features.len(), node_feature_dim));
                }
                node_values.extend(features);
                graph_idx.push(rank);
            }
            for edge in graph.raw_edges() {
                from_idx.push(offset + edge.source().index());
                to_idx.push(offset + edge.target().index());
                if edge_feature_dim > 0 {
                    let features = edge_features(&edge.weight);
                    if features.len() != edge_feature_dim {
                        return Err(anyhow!("pack_graphs : edge features of graph {} have length {}, expected {}", rank, features.len(), edge_feature_dim));
                    }
                    edge_values.extend(features);
                }
            }
            offset += graph.node_count();
        }
        let node_features = Array2::from_shape_vec((n_nodes, node_feature_dim), node_values)?;
        let edge_features = match edge_feature_dim {
            0 => None,
            _ => Some(Array2::from_shape_vec((n_edges, edge_feature_dim), edge_values)?),
        };
        GraphData::new(from_idx, to_idx, node_features, edge_features, graph_idx, graphs.len())
    } // end of pack_graphs_with

    pub fn get_from_idx(&self) -> &[usize] {
        &self.from_idx
    }

    pub fn get_to_idx(&self) -> &[usize] {
        &self.to_idx
    }

    pub fn get_node_features(&self) -> &Array2<F> {
        &self.node_features
    }

    pub fn get_edge_features(&self) -> Option<&Array2<F>> {
        self.edge_features.as_ref()
    }

    pub fn get_graph_idx(&self) -> &[usize] {
        &self.graph_idx
    }

    pub fn get_nb_graphs(&self) -> usize {
        self.n_graphs
    }

    pub fn get_nb_nodes(&self) -> usize {
        self.graph_idx.len()
    }

    pub fn get_nb_edges(&self) -> usize {
        self.from_idx.len()
    }

    pub fn get_node_feature_dim(&self) -> usize {
        self.node_features.ncols()
    }

    /// 0 if batch has no edge features
    pub fn get_edge_feature_dim(&self) -> usize {
        self.edge_features.as_ref().map_or(0, |e| e.ncols())
    }

    /// number of nodes of each graph
    pub fn get_graph_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_graphs];
        for g in &self.graph_idx {
            sizes[*g] += 1;
        }
        sizes
    }

    /// tensors and index structures used by a forward pass
    pub fn topology(&self, device: &Device) -> anyhow::Result<BatchTopology> {
        let n_nodes = self.get_nb_nodes();
        let edge_features = match &self.edge_features {
            Some(features) => Some(array2_to_tensor(&features.view(), device)?),
            None => None,
        };
        Ok(BatchTopology {
            n_nodes,
            n_edges: self.get_nb_edges(),
            from: index_tensor(&self.from_idx, device)?,
            to: index_tensor(&self.to_idx, device)?,
            node_features: array2_to_tensor(&self.node_features.view(), device)?,
            edge_features,
            incoming: Segments::new(&self.to_idx, n_nodes, device)?,
            outgoing: Segments::new(&self.from_idx, n_nodes, device)?,
            graphs: Segments::new(&self.graph_idx, self.n_graphs, device)?,
        })
    } // end of topology

    /// splits per node values (one row per node) into one array per graph
    pub fn split_by_graph(&self, node_values: &ArrayView2<F>) -> anyhow::Result<Vec<Array2<F>>> {
        if node_values.nrows() != self.get_nb_nodes() {
            return Err(anyhow!("split_by_graph : {} rows for {} nodes", node_values.nrows(), self.get_nb_nodes()));
        }
        let mut members = vec![Vec::<usize>::new(); self.n_graphs];
        for (node, g) in self.graph_idx.iter().enumerate() {
            members[*g].push(node);
        }
        Ok(members.iter().map(|m| node_values.select(Axis(0), m)).collect())
    }
} // end of impl GraphData

//==================================================================================

/// Tensors and segment structures of a batch, built once per forward pass and shared by all rounds.
pub struct BatchTopology {
    n_nodes: usize,
    n_edges: usize,
    /// source of each edge, u32
    from: Tensor,
    /// destination of each edge, u32
    to: Tensor,
    node_features: Tensor,
    edge_features: Option<Tensor>,
    /// edges grouped by destination node
    incoming: Segments,
    /// edges grouped by source node, destinations of reverse messages
    outgoing: Segments,
    /// nodes grouped by graph
    graphs: Segments,
}

impl BatchTopology {
    pub fn get_nb_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn get_nb_edges(&self) -> usize {
        self.n_edges
    }

    pub fn get_from(&self) -> &Tensor {
        &self.from
    }

    pub fn get_to(&self) -> &Tensor {
        &self.to
    }

    pub fn get_node_features(&self) -> &Tensor {
        &self.node_features
    }

    pub fn get_edge_features(&self) -> Option<&Tensor> {
        self.edge_features.as_ref()
    }

    pub fn get_incoming(&self) -> &Segments {
        &self.incoming
    }

    pub fn get_outgoing(&self) -> &Segments {
        &self.outgoing
    }

    pub fn get_graphs(&self) -> &Segments {
        &self.graphs
    }
} // end of impl BatchTopology

// end of mod tests
