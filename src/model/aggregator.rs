//! Aggregates node states into one vector per graph.
//!
//! Node states go through a network, in gated mode the network output is split in two halves and
//! sigmoid(first half) gates the second half so that each node controls how much it contributes.
//! Contributions are reduced per graph (sum, mean, sqrt_n or max), an optional network transforms the result.

use candle_core::Tensor;

use super::config::{AggregationType, AggregatorConfig};
use crate::graph::segment::Segments;
use crate::nn::init::Initializer;
use crate::nn::linear::Mlp;
use crate::nn::real::Real;
use crate::nn::store::ParamStore;

pub struct GraphAggregator {
    node_net: Mlp,
    graph_transform: Option<Mlp>,
    gated: bool,
    /// width of the aggregated vectors before transform
    graph_state_dim: usize,
    aggregation_type: AggregationType,
} // end of GraphAggregator

impl GraphAggregator {
    pub fn new<F: Real>(store: &mut ParamStore, config: &AggregatorConfig, node_state_dim: usize) -> anyhow::Result<Self> {
        let mut sizes = config.node_hidden_sizes.clone();
        let graph_state_dim = sizes.last().copied().unwrap_or(0);
        if config.gated {
            if let Some(last) = sizes.last_mut() {
                *last *= 2;
            }
        }
        let node_net = Mlp::new::<F>(store, "aggregator.node", node_state_dim, &sizes, Initializer::TruncatedNormal)?;
        let graph_transform = match &config.graph_transform_sizes {
            Some(sizes) if !sizes.is_empty() => Some(Mlp::new::<F>(store, "aggregator.transform", graph_state_dim, sizes, Initializer::TruncatedNormal)?),
            _ => None,
        };
        log::debug!("GraphAggregator, gated : {}, aggregation : {}, graph state dim : {}", config.gated, config.aggregation_type, graph_state_dim);
        Ok(GraphAggregator { node_net, graph_transform, gated: config.gated, graph_state_dim, aggregation_type: config.aggregation_type })
    }

    /// dimension of output graph vectors
    pub fn get_output_dim(&self) -> usize {
        match &self.graph_transform {
            Some(net) => net.get_output_dim(),
            None => self.graph_state_dim,
        }
    }

    pub fn get_aggregation_type(&self) -> AggregationType {
        self.aggregation_type
    }

    /// One row per segment of graphs, in segment order.
    /// An empty graph gets a zero row before the transform network.
    pub fn forward(&self, node_states: &Tensor, graphs: &Segments) -> anyhow::Result<Tensor> {
        let mut contributions = self.node_net.forward(node_states)?;
        if self.gated {
            let dim = self.graph_state_dim;
            let gates = candle_nn::ops::sigmoid(&contributions.narrow(1, 0, dim)?)?;
            let values = contributions.narrow(1, dim, dim)?;
            contributions = gates.mul(&values)?;
        }
        let graph_states = graphs.reduce(&contributions, self.aggregation_type)?;
        match &self.graph_transform {
            Some(net) => net.forward(&graph_states),
            None => Ok(graph_states),
        }
    } // end of forward
} // end of impl GraphAggregator

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;
    use ndarray::{arr1, arr2, Array2};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn gated_sum_known_values() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f64>(9);
        let config = AggregatorConfig { node_hidden_sizes: vec![1], graph_transform_sizes: None, gated: true, aggregation_type: AggregationType::Sum };
        let aggregator = GraphAggregator::new::<f64>(&mut store, &config, 1).unwrap();
        assert_eq!(aggregator.get_output_dim(), 1);
        // biases 0, weights (1, 1) : each node contributes sigmoid(h) * h
        assert_eq!(store.nb_params(), 4);
        store.set_flat_params(&arr1(&[0f64, 0., 1., 1.]).view()).unwrap();
        let states = array2_to_tensor(&arr2(&[[1.], [2.], [-1.]]).view(), store.get_device()).unwrap();
        let graphs = Segments::new(&[0, 0, 1], 2, store.get_device()).unwrap();
        let vectors = tensor_to_array2::<f64>(&aggregator.forward(&states, &graphs).unwrap()).unwrap();
        let sig = |x: f64| 1. / (1. + (-x).exp());
        assert!((vectors[[0, 0]] - (sig(1.) + 2. * sig(2.))).abs() < 1.0E-12);
        assert!((vectors[[1, 0]] + sig(-1.)).abs() < 1.0E-12);
    } // end of gated_sum_known_values

    #[test]
    fn max_of_empty_graph_is_zero() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f32>(99);
        let config = AggregatorConfig { node_hidden_sizes: vec![8, 4], graph_transform_sizes: None, gated: true, aggregation_type: AggregationType::Max };
        let aggregator = GraphAggregator::new::<f32>(&mut store, &config, 3).unwrap();
        // graph 1 has no node
        let graphs = Segments::new(&[0, 0, 2, 2], 3, store.get_device()).unwrap();
        let states = Array2::<f32>::from_shape_fn((4, 3), |(i, j)| -((i + j) as f32) - 1.);
        let states = array2_to_tensor(&states.view(), store.get_device()).unwrap();
        let vectors = tensor_to_array2::<f32>(&aggregator.forward(&states, &graphs).unwrap()).unwrap();
        assert_eq!(vectors.dim(), (3, 4));
        assert!(vectors.row(1).iter().all(|v| *v == 0f32));
    }

    #[test]
    fn transform_sets_output_dim() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f64>(999);
        let config = AggregatorConfig { node_hidden_sizes: vec![6], graph_transform_sizes: Some(vec![5, 3]), gated: false, aggregation_type: AggregationType::Mean };
        let aggregator = GraphAggregator::new::<f64>(&mut store, &config, 4).unwrap();
        assert_eq!(aggregator.get_output_dim(), 3);
        assert_eq!(store.nb_params(), 4 * 6 + 6 + 6 * 5 + 5 + 5 * 3 + 3);
        let graphs = Segments::new(&[0, 1, 1], 2, store.get_device()).unwrap();
        let ones = array2_to_tensor(&Array2::<f64>::ones((3, 4)).view(), store.get_device()).unwrap();
        let vectors = tensor_to_array2::<f64>(&aggregator.forward(&ones, &graphs).unwrap()).unwrap();
        assert_eq!(vectors.dim(), (2, 3));
        // identical nodes, mean makes both graphs equal
        for d in 0..3 {
            assert!((vectors[[0, d]] - vectors[[1, d]]).abs() < 1.0E-12);
        }
    }
} // end of mod tests
