//! Graph embedding and graph matching networks.
//!
//! Both models chain the same stages : encoder, n_prop_layers propagation rounds, aggregator.
//! The matching model uses propagation layers with cross graph attention between graphs 2i and 2i+1 of a batch,
//! the embedding model computes each graph vector independently of the other graphs.
//!
//! Round t+1 starts once round t node states are fully computed. Parameters are only read during a forward pass,
//! the graph vectors returned by [GraphNet::forward_tensor] keep the computation graph for backpropagation.

use anyhow::anyhow;

use std::marker::PhantomData;

use candle_core::Tensor;
use ndarray::{Array1, Array2, ArrayView1};

use super::aggregator::GraphAggregator;
use super::config::{ModelConfig, ModelType, PropagationConfig};
use super::encoder::GraphEncoder;
use super::prop::GraphPropLayer;
use crate::graph::graphdata::{BatchTopology, GraphData};
use crate::nn::real::{real, Real};
use crate::nn::store::ParamStore;
use crate::nn::tensor::tensor_to_array2;

/// Pool of propagation layers. With shared parameters the pool holds one layer used at every round,
/// otherwise round t uses layer t.
pub struct PropagationStack {
    pool: Vec<GraphPropLayer>,
    share_params: bool,
    n_prop_layers: usize,
} // end of PropagationStack

impl PropagationStack {
    /// layer k has its parameters under `prop.k`
    pub fn new<F: Real>(store: &mut ParamStore, config: &PropagationConfig, edge_feature_dim: usize, matching: bool) -> anyhow::Result<Self> {
        PropagationStack::with_nb_built::<F>(store, config, edge_feature_dim, matching, config.n_prop_layers)
    }

    /// builds nb_built unshared layers (1 if shared) whatever config.n_prop_layers is
    pub(crate) fn with_nb_built<F: Real>(
        store: &mut ParamStore,
        config: &PropagationConfig,
        edge_feature_dim: usize,
        matching: bool,
        nb_built: usize,
    ) -> anyhow::Result<Self> {
        let nb_built = if config.share_prop_params { 1 } else { nb_built };
        let mut pool = Vec::<GraphPropLayer>::with_capacity(nb_built);
        for k in 0..nb_built {
            pool.push(GraphPropLayer::new::<F>(store, &format!("prop.{}", k), config, edge_feature_dim, matching)?);
        }
        Ok(PropagationStack { pool, share_params: config.share_prop_params, n_prop_layers: config.n_prop_layers })
    }

    /// number of rounds run by forward
    pub fn get_nb_prop_layers(&self) -> usize {
        self.n_prop_layers
    }

    /// number of layers holding parameters
    pub fn get_nb_built_layers(&self) -> usize {
        self.pool.len()
    }

    pub fn is_shared(&self) -> bool {
        self.share_params
    }

    /// layer used at round t
    pub fn get_layer(&self, t: usize) -> &GraphPropLayer {
        if self.share_params {
            &self.pool[0]
        } else {
            &self.pool[t]
        }
    }

    /// Changes the number of rounds. Without parameter sharing we cannot go beyond the number of built layers.
    pub fn reset_n_prop_layers(&mut self, n_prop_layers: usize) -> anyhow::Result<()> {
        if !self.share_params && n_prop_layers > self.pool.len() {
            log::error!("cannot run {} rounds, only {} unshared layers were built", n_prop_layers, self.pool.len());
            return Err(anyhow!("cannot run {} propagation rounds, only {} unshared layers were built", n_prop_layers, self.pool.len()));
        }
        log::debug!("number of propagation rounds : {} -> {}", self.n_prop_layers, n_prop_layers);
        self.n_prop_layers = n_prop_layers;
        Ok(())
    }

    /// returns node states after each round, the first entry being the initial states
    pub fn forward(&self, initial_states: Tensor, topology: &BatchTopology, edge_features: Option<&Tensor>) -> anyhow::Result<Vec<Tensor>> {
        let mut layer_outputs = Vec::<Tensor>::with_capacity(self.n_prop_layers + 1);
        layer_outputs.push(initial_states);
        for t in 0..self.n_prop_layers {
            let new_states = self.get_layer(t).forward(&layer_outputs[t], topology, edge_features)?;
            layer_outputs.push(new_states);
        }
        Ok(layer_outputs)
    }
} // end of impl PropagationStack

//=========================================================================================

/// result of a forward pass with history
pub struct ForwardOutput<F> {
    /// one row per graph
    pub graph_vectors: Array2<F>,
    /// node states \[h0, h1, ..., hT\], h0 being encoded node features
    pub layer_outputs: Vec<Array2<F>>,
}

pub struct GraphNet<F> {
    config: ModelConfig,
    node_feature_dim: usize,
    edge_feature_dim: usize,
    store: ParamStore,
    encoder: GraphEncoder,
    prop_stack: PropagationStack,
    aggregator: GraphAggregator,
    _f: PhantomData<F>,
} // end of GraphNet

impl<F: Real> GraphNet<F> {
    /// Builds a model for batches with given raw feature dimensions (edge_feature_dim = 0 for no edge features).
    /// Parameters are initialized from seed.
    pub fn new(config: &ModelConfig, node_feature_dim: usize, edge_feature_dim: usize, seed: u64) -> anyhow::Result<Self> {
        GraphNet::with_nb_built_layers(config, node_feature_dim, edge_feature_dim, seed, config.propagation.n_prop_layers)
    }

    /// as new but builds nb_built unshared propagation layers, config.n_prop_layers rounds being run.
    /// This is what a reload needs after [GraphNet::reset_n_prop_layers] lowered the number of rounds.
    pub fn with_nb_built_layers(config: &ModelConfig, node_feature_dim: usize, edge_feature_dim: usize, seed: u64, nb_built: usize) -> anyhow::Result<Self> {
        config.validate(node_feature_dim, edge_feature_dim)?;
        if !config.propagation.share_prop_params && nb_built < config.propagation.n_prop_layers {
            log::error!("{} propagation rounds need {} unshared layers, asked to build {}", config.propagation.n_prop_layers, config.propagation.n_prop_layers, nb_built);
            return Err(anyhow!("{} propagation rounds cannot run on {} unshared layers", config.propagation.n_prop_layers, nb_built));
        }
        log::info!(
            "building {} model, node state dim {}, {} rounds, update {}, shared : {}",
            config.model_type,
            config.propagation.node_state_dim,
            config.propagation.n_prop_layers,
            config.propagation.node_update_type,
            config.propagation.share_prop_params
        );
        // each stage gets its own stream
        let mut store = ParamStore::new::<F>(seed);
        let encoder = GraphEncoder::new::<F>(&mut store, &config.encoder, node_feature_dim, edge_feature_dim)?;
        store.jump();
        let matching = config.model_type == ModelType::Matching;
        let encoded_edge_dim = config.encoder.get_edge_output_dim(edge_feature_dim);
        let prop_stack = PropagationStack::with_nb_built::<F>(&mut store, &config.propagation, encoded_edge_dim, matching, nb_built)?;
        store.jump();
        let aggregator = GraphAggregator::new::<F>(&mut store, &config.aggregator, config.propagation.node_state_dim)?;
        log::info!("model has {} parameters in {} variables", store.nb_params(), store.get_nb_vars());
        Ok(GraphNet { config: config.clone(), node_feature_dim, edge_feature_dim, store, encoder, prop_stack, aggregator, _f: PhantomData })
    } // end of with_nb_built_layers

    pub fn get_config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn get_model_type(&self) -> ModelType {
        self.config.model_type
    }

    pub fn get_node_feature_dim(&self) -> usize {
        self.node_feature_dim
    }

    pub fn get_edge_feature_dim(&self) -> usize {
        self.edge_feature_dim
    }

    pub fn get_graph_vector_dim(&self) -> usize {
        self.aggregator.get_output_dim()
    }

    pub fn get_nb_prop_layers(&self) -> usize {
        self.prop_stack.get_nb_prop_layers()
    }

    /// number of propagation layers holding parameters
    pub fn get_nb_built_prop_layers(&self) -> usize {
        self.prop_stack.get_nb_built_layers()
    }

    /// the parameters, to give to an optimizer or to dump
    pub fn get_store(&self) -> &ParamStore {
        &self.store
    }

    pub fn nb_params(&self) -> usize {
        self.store.nb_params()
    }

    /// all parameters as one vector, see [ParamStore::flat_params]
    pub fn flat_params(&self) -> anyhow::Result<Array1<F>> {
        self.store.flat_params::<F>()
    }

    pub fn set_flat_params(&self, flat: &ArrayView1<F>) -> anyhow::Result<()> {
        self.store.set_flat_params(flat)
    }

    /// see [PropagationStack::reset_n_prop_layers]
    pub fn reset_n_prop_layers(&mut self, n_prop_layers: usize) -> anyhow::Result<()> {
        self.prop_stack.reset_n_prop_layers(n_prop_layers)?;
        self.config.propagation.n_prop_layers = n_prop_layers;
        Ok(())
    }

    fn check_batch(&self, batch: &GraphData<F>) -> anyhow::Result<()> {
        if batch.get_node_feature_dim() != self.node_feature_dim || batch.get_edge_feature_dim() != self.edge_feature_dim {
            log::error!(
                "batch feature dims ({}, {}) , model expects ({}, {})",
                batch.get_node_feature_dim(),
                batch.get_edge_feature_dim(),
                self.node_feature_dim,
                self.edge_feature_dim
            );
            return Err(anyhow!(
                "batch feature dims ({}, {}) , model expects ({}, {})",
                batch.get_node_feature_dim(),
                batch.get_edge_feature_dim(),
                self.node_feature_dim,
                self.edge_feature_dim
            ));
        }
        if self.config.model_type == ModelType::Matching && batch.get_nb_graphs() % 2 != 0 {
            log::error!("matching model needs an even number of graphs, got {}", batch.get_nb_graphs());
            return Err(anyhow!("matching model needs an even number of graphs, got {}", batch.get_nb_graphs()));
        }
        Ok(())
    }

    // graph vectors and node states after each round, as tensors
    fn run(&self, batch: &GraphData<F>) -> anyhow::Result<(Tensor, Vec<Tensor>)> {
        self.check_batch(batch)?;
        let topology = batch.topology(self.store.get_device())?;
        let (node_states, edge_states) = self.encoder.forward(topology.get_node_features(), topology.get_edge_features())?;
        let layer_outputs = self.prop_stack.forward(node_states, &topology, edge_states.as_ref())?;
        let last = &layer_outputs[layer_outputs.len() - 1];
        let graph_vectors = self.aggregator.forward(last, topology.get_graphs())?;
        Ok((graph_vectors, layer_outputs))
    }

    /// graph vectors as a (nb_graphs, dim) tensor, differentiable with respect to the parameters
    pub fn forward_tensor(&self, batch: &GraphData<F>) -> anyhow::Result<Tensor> {
        Ok(self.run(batch)?.0)
    }

    /// graph vectors and node states after each round
    pub fn forward_with_history(&self, batch: &GraphData<F>) -> anyhow::Result<ForwardOutput<F>> {
        let (vectors, layers) = self.run(batch)?;
        let layer_outputs = layers.iter().map(tensor_to_array2::<F>).collect::<anyhow::Result<Vec<Array2<F>>>>()?;
        Ok(ForwardOutput { graph_vectors: tensor_to_array2::<F>(&vectors)?, layer_outputs })
    }

    /// one graph vector per graph of the batch, in graph order
    pub fn forward(&self, batch: &GraphData<F>) -> anyhow::Result<Array2<F>> {
        tensor_to_array2::<F>(&self.forward_tensor(batch)?)
    }

    /// l2 norm of all parameters
    pub fn get_param_scale(&self) -> anyhow::Result<F> {
        Ok(real::<F>(self.store.global_norm()?))
    }
} // end of impl GraphNet

// end of mod tests
