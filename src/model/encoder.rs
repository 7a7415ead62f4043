//! Encodes raw node and edge features with independent networks.

use candle_core::Tensor;

use super::config::EncoderConfig;
use crate::nn::init::Initializer;
use crate::nn::linear::Mlp;
use crate::nn::real::Real;
use crate::nn::store::ParamStore;

pub struct GraphEncoder {
    /// None : node features pass through
    node_net: Option<Mlp>,
    /// None : edge features pass through
    edge_net: Option<Mlp>,
}

impl GraphEncoder {
    pub fn new<F: Real>(store: &mut ParamStore, config: &EncoderConfig, node_feature_dim: usize, edge_feature_dim: usize) -> anyhow::Result<Self> {
        let node_net = match &config.node_hidden_sizes {
            Some(sizes) if !sizes.is_empty() => Some(Mlp::new::<F>(store, "encoder.node", node_feature_dim, sizes, Initializer::TruncatedNormal)?),
            _ => None,
        };
        let edge_net = match &config.edge_hidden_sizes {
            Some(sizes) if !sizes.is_empty() && edge_feature_dim > 0 => {
                Some(Mlp::new::<F>(store, "encoder.edge", edge_feature_dim, sizes, Initializer::TruncatedNormal)?)
            }
            _ => None,
        };
        Ok(GraphEncoder { node_net, edge_net })
    }

    /// returns encoded node features and, if edge features are present, encoded edge features
    pub fn forward(&self, node_features: &Tensor, edge_features: Option<&Tensor>) -> anyhow::Result<(Tensor, Option<Tensor>)> {
        let nodes = match &self.node_net {
            Some(net) => net.forward(node_features)?,
            None => node_features.clone(),
        };
        let edges = match (edge_features, &self.edge_net) {
            (Some(e), Some(net)) => Some(net.forward(e)?),
            (Some(e), None) => Some(e.clone()),
            (None, _) => None,
        };
        Ok((nodes, edges))
    }
} // end of impl GraphEncoder

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;
    use ndarray::Array2;

    #[test]
    fn pass_through_and_encoded() {
        let mut store = ParamStore::new::<f64>(3);
        let nodes = Array2::<f64>::from_elem((4, 3), 0.5);
        let edges = Array2::<f64>::from_elem((2, 2), 1.);
        let nodes_t = array2_to_tensor(&nodes.view(), store.get_device()).unwrap();
        let edges_t = array2_to_tensor(&edges.view(), store.get_device()).unwrap();
        // identity encoder
        let identity = GraphEncoder::new::<f64>(&mut store, &EncoderConfig::new(None, Some(vec![])), 3, 2).unwrap();
        assert_eq!(store.nb_params(), 0);
        let (n, e) = identity.forward(&nodes_t, Some(&edges_t)).unwrap();
        assert_eq!(tensor_to_array2::<f64>(&n).unwrap(), nodes);
        assert_eq!(tensor_to_array2::<f64>(&e.unwrap()).unwrap(), edges);
        //
        let mut store = ParamStore::new::<f64>(3);
        let encoder = GraphEncoder::new::<f64>(&mut store, &EncoderConfig::new(Some(vec![8]), Some(vec![5])), 3, 2).unwrap();
        let (n, e) = encoder.forward(&nodes_t, Some(&edges_t)).unwrap();
        assert_eq!(n.dims(), &[4, 8]);
        assert_eq!(e.unwrap().dims(), &[2, 5]);
        let (_, e) = encoder.forward(&nodes_t, None).unwrap();
        assert!(e.is_none());
    }
}
