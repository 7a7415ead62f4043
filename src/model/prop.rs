//! One round of message passing.
//!
//! For each edge (i -> j) a message network is applied to concat(h_i, h_j, e_ij), messages are summed by destination.
//! With reverse direction enabled, messages are also sent from j to i (with the same network or a distinct one)
//! and added to the forward ones.
//! The node update rule then combines aggregated messages (and, for matching layers, the cross graph attention
//! input h - attention) with the current node states.

use anyhow::anyhow;

use candle_core::Tensor;

use super::attention::block_pair_attention;
use super::config::{NodeUpdateType, PropagationConfig, Similarity};
use crate::graph::graphdata::BatchTopology;
use crate::graph::segment::{gather_rows, Segments};
use crate::nn::gru::GruCell;
use crate::nn::init::Initializer;
use crate::nn::layernorm::LayerNorm;
use crate::nn::linear::Mlp;
use crate::nn::real::Real;
use crate::nn::store::ParamStore;

/// Node update rule, see [NodeUpdateType]
pub enum NodeUpdate {
    Mlp(Mlp),
    Residual(Mlp),
    Gru(GruCell),
}

impl NodeUpdate {
    /// input_dim is the width of the update inputs (aggregated messages and attention input), not counting node states.
    pub fn new<F: Real>(
        store: &mut ParamStore,
        prefix: &str,
        update_type: NodeUpdateType,
        input_dim: usize,
        node_state_dim: usize,
        node_hidden_sizes: &[usize],
    ) -> anyhow::Result<Self> {
        let mut sizes = node_hidden_sizes.to_vec();
        sizes.push(node_state_dim);
        let init = Initializer::TruncatedNormal;
        let update = match update_type {
            NodeUpdateType::Mlp => NodeUpdate::Mlp(Mlp::new::<F>(store, prefix, input_dim + node_state_dim, &sizes, init)?),
            NodeUpdateType::Residual => NodeUpdate::Residual(Mlp::new::<F>(store, prefix, input_dim + node_state_dim, &sizes, init)?),
            NodeUpdateType::Gru => NodeUpdate::Gru(GruCell::new::<F>(store, prefix, input_dim, node_state_dim)?),
        };
        Ok(update)
    }

    pub fn get_type(&self) -> NodeUpdateType {
        match self {
            NodeUpdate::Mlp(_) => NodeUpdateType::Mlp,
            NodeUpdate::Residual(_) => NodeUpdateType::Residual,
            NodeUpdate::Gru(_) => NodeUpdateType::Gru,
        }
    }

    /// new node states. The mlp rules see concat(inputs, node_states).
    /// norm, if any, is applied on the mlp output (ignored by gru).
    pub fn update(&self, inputs: &Tensor, node_states: &Tensor, norm: Option<&LayerNorm>) -> anyhow::Result<Tensor> {
        match self {
            NodeUpdate::Gru(gru) => gru.forward(inputs, node_states),
            NodeUpdate::Mlp(mlp) | NodeUpdate::Residual(mlp) => {
                let mlp_inputs = Tensor::cat(&[inputs, node_states], 1)?;
                let mut mlp_output = mlp.forward(&mlp_inputs)?;
                if let Some(norm) = norm {
                    mlp_output = norm.forward(&mlp_output)?;
                }
                match self {
                    NodeUpdate::Residual(_) => Ok(mlp_output.add(node_states)?),
                    _ => Ok(mlp_output),
                }
            }
        }
    } // end of update
} // end of impl NodeUpdate

//=====================================================================================

pub struct GraphPropLayer {
    node_state_dim: usize,
    message_dim: usize,
    message_net: Mlp,
    /// only when reverse messages have their own parameters
    reverse_message_net: Option<Mlp>,
    use_reverse_direction: bool,
    message_norm: Option<LayerNorm>,
    update: NodeUpdate,
    update_norm: Option<LayerNorm>,
    /// Some for matching layers
    similarity: Option<Similarity>,
} // end of GraphPropLayer

impl GraphPropLayer {
    /// edge_feature_dim is the width of encoded edge features, 0 if there are none.
    /// A matching layer adds cross graph attention between graphs 2i and 2i+1.
    /// Parameters are named `prefix.message`, `prefix.update` ...
    pub fn new<F: Real>(store: &mut ParamStore, prefix: &str, config: &PropagationConfig, edge_feature_dim: usize, matching: bool) -> anyhow::Result<Self> {
        let node_state_dim = config.node_state_dim;
        let message_dim = match config.edge_hidden_sizes.last() {
            Some(dim) => *dim,
            None => {
                log::error!("GraphPropLayer::new, empty edge_hidden_sizes");
                return Err(anyhow!("GraphPropLayer::new, empty edge_hidden_sizes"));
            }
        };
        let message_init = Initializer::VarianceScaling(config.edge_net_init_scale);
        let message_input_dim = 2 * node_state_dim + edge_feature_dim;
        let message_net = Mlp::new::<F>(store, &format!("{}.message", prefix), message_input_dim, &config.edge_hidden_sizes, message_init)?;
        let reverse_message_net = if config.use_reverse_direction && config.reverse_dir_param_different {
            Some(Mlp::new::<F>(store, &format!("{}.reverse_message", prefix), message_input_dim, &config.edge_hidden_sizes, message_init)?)
        } else {
            None
        };
        let update_input_dim = if matching { message_dim + node_state_dim } else { message_dim };
        let update = NodeUpdate::new::<F>(
            store,
            &format!("{}.update", prefix),
            config.node_update_type,
            update_input_dim,
            node_state_dim,
            &config.node_hidden_sizes,
        )?;
        let message_norm = match config.layer_norm {
            true => Some(LayerNorm::new::<F>(store, &format!("{}.message_norm", prefix), message_dim)?),
            false => None,
        };
        let update_norm = match (config.layer_norm, config.node_update_type) {
            (true, NodeUpdateType::Mlp) | (true, NodeUpdateType::Residual) => {
                Some(LayerNorm::new::<F>(store, &format!("{}.update_norm", prefix), node_state_dim)?)
            }
            _ => None,
        };
        let similarity = if matching { Some(config.similarity) } else { None };
        Ok(GraphPropLayer {
            node_state_dim,
            message_dim,
            message_net,
            reverse_message_net,
            use_reverse_direction: config.use_reverse_direction,
            message_norm,
            update,
            update_norm,
            similarity,
        })
    } // end of new

    pub fn get_node_state_dim(&self) -> usize {
        self.node_state_dim
    }

    pub fn is_matching(&self) -> bool {
        self.similarity.is_some()
    }

    pub fn get_update_type(&self) -> NodeUpdateType {
        self.update.get_type()
    }

    // messages along edges from -> to, summed on destinations
    fn propagate_once(net: &Mlp, node_states: &Tensor, from: &Tensor, to: &Tensor, edge_features: Option<&Tensor>, destinations: &Segments) -> anyhow::Result<Tensor> {
        let from_states = gather_rows(node_states, from)?;
        let to_states = gather_rows(node_states, to)?;
        let edge_inputs = match edge_features {
            Some(e) => Tensor::cat(&[&from_states, &to_states, e], 1)?,
            None => Tensor::cat(&[&from_states, &to_states], 1)?,
        };
        let messages = net.forward(&edge_inputs)?;
        destinations.sum(&messages)
    }

    /// messages summed by destination node (forward and reverse directions).
    /// A node without incoming message gets a zero row (before layer norm).
    pub fn aggregate_messages(&self, node_states: &Tensor, topology: &BatchTopology, edge_features: Option<&Tensor>) -> anyhow::Result<Tensor> {
        let mut aggregated = if topology.get_nb_edges() == 0 {
            Tensor::zeros((topology.get_nb_nodes(), self.message_dim), node_states.dtype(), node_states.device())?
        } else {
            let (from, to) = (topology.get_from(), topology.get_to());
            let forward = GraphPropLayer::propagate_once(&self.message_net, node_states, from, to, edge_features, topology.get_incoming())?;
            if self.use_reverse_direction {
                let net = self.reverse_message_net.as_ref().unwrap_or(&self.message_net);
                let reverse = GraphPropLayer::propagate_once(net, node_states, to, from, edge_features, topology.get_outgoing())?;
                forward.add(&reverse)?
            } else {
                forward
            }
        };
        if let Some(norm) = &self.message_norm {
            aggregated = norm.forward(&aggregated)?;
        }
        Ok(aggregated)
    } // end of aggregate_messages

    /// one propagation round, returns new node states
    pub fn forward(&self, node_states: &Tensor, topology: &BatchTopology, edge_features: Option<&Tensor>) -> anyhow::Result<Tensor> {
        let nb_nodes = topology.get_nb_nodes();
        if node_states.dims2()? != (nb_nodes, self.node_state_dim) {
            log::error!("GraphPropLayer::forward, node states shape {:?}, expected {:?}", node_states.dims(), (nb_nodes, self.node_state_dim));
            return Err(anyhow!("GraphPropLayer::forward, node states shape {:?}, expected {:?}", node_states.dims(), (nb_nodes, self.node_state_dim)));
        }
        let aggregated = self.aggregate_messages(node_states, topology, edge_features)?;
        let inputs = match self.similarity {
            None => aggregated,
            Some(similarity) => {
                let attention = block_pair_attention(node_states, topology.get_graphs(), similarity)?;
                let attention_input = node_states.sub(&attention)?;
                Tensor::cat(&[&aggregated, &attention_input], 1)?
            }
        };
        self.update.update(&inputs, node_states, self.update_norm.as_ref())
    } // end of forward
} // end of impl GraphPropLayer

// end of mod tests
