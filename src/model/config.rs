//! Configuration of models, datasets and training.
//!
//! All names used in configurations (update rule, aggregation, similarity, model variant, loss, training mode)
//! are parsed through [FromStr] so that an unknown name is rejected before any computation.
//! The whole [Config] is serde serializable, it is stored along learned parameters in model dumps.

use anyhow::anyhow;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use crate::graph::segment::AggregationType;

/// How node states are updated from aggregated messages
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeUpdateType {
    /// h' = MLP(inputs, h)
    Mlp,
    /// h' = h + MLP(inputs, h)
    Residual,
    /// h' = GRU(inputs, h)
    Gru,
}

impl FromStr for NodeUpdateType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mlp" => Ok(NodeUpdateType::Mlp),
            "residual" => Ok(NodeUpdateType::Residual),
            "gru" => Ok(NodeUpdateType::Gru),
            _ => {
                log::error!("unknown node update type : {}", s);
                Err(anyhow!("unknown node update type \"{}\", expected one of mlp, residual, gru", s))
            }
        }
    }
}

impl fmt::Display for NodeUpdateType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            NodeUpdateType::Mlp => "mlp",
            NodeUpdateType::Residual => "residual",
            NodeUpdateType::Gru => "gru",
        };
        write!(f, "{}", name)
    }
}

/// Pairwise node similarity used in cross graph attention
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    /// - squared euclidean distance
    Euclidean,
    DotProduct,
    /// dot product of l2 normalized vectors
    Cosine,
}

impl FromStr for Similarity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euclidean" => Ok(Similarity::Euclidean),
            "dotproduct" => Ok(Similarity::DotProduct),
            "cosine" => Ok(Similarity::Cosine),
            _ => {
                log::error!("unknown similarity : {}", s);
                Err(anyhow!("unknown similarity \"{}\", expected one of euclidean, dotproduct, cosine", s))
            }
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Similarity::Euclidean => "euclidean",
            Similarity::DotProduct => "dotproduct",
            Similarity::Cosine => "cosine",
        };
        write!(f, "{}", name)
    }
}

/// The embedding model propagates inside each graph only,
/// the matching model adds cross graph attention between the graphs of a pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Embedding,
    Matching,
}

impl FromStr for ModelType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedding" => Ok(ModelType::Embedding),
            "matching" => Ok(ModelType::Matching),
            _ => {
                log::error!("unknown model type : {}", s);
                Err(anyhow!("unknown model type \"{}\", expected embedding or matching", s))
            }
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelType::Embedding => write!(f, "embedding"),
            ModelType::Matching => write!(f, "matching"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossType {
    /// hinge loss on euclidean distance
    Margin,
    /// squared error on approximate hamming similarity
    Hamming,
}

impl FromStr for LossType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "margin" => Ok(LossType::Margin),
            "hamming" => Ok(LossType::Hamming),
            _ => {
                log::error!("unknown loss type : {}", s);
                Err(anyhow!("unknown loss type \"{}\", expected margin or hamming", s))
            }
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LossType::Margin => write!(f, "margin"),
            LossType::Hamming => write!(f, "hamming"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    /// labelled pairs (g1, g2), label +1 for similar graphs and -1 otherwise
    Pair,
    /// triplets (g1, g2, g3) with g2 closer to g1 than g3
    Triplet,
}

impl FromStr for TrainingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pair" => Ok(TrainingMode::Pair),
            "triplet" => Ok(TrainingMode::Triplet),
            _ => {
                log::error!("unknown training mode : {}", s);
                Err(anyhow!("unknown training mode \"{}\", expected pair or triplet", s))
            }
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrainingMode::Pair => write!(f, "pair"),
            TrainingMode::Triplet => write!(f, "triplet"),
        }
    }
}

//=======================================================================================

/// Encoder networks. None (or an empty list) means the features pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub node_hidden_sizes: Option<Vec<usize>>,
    pub edge_hidden_sizes: Option<Vec<usize>>,
}

impl EncoderConfig {
    pub fn new(node_hidden_sizes: Option<Vec<usize>>, edge_hidden_sizes: Option<Vec<usize>>) -> Self {
        EncoderConfig { node_hidden_sizes, edge_hidden_sizes }
    }

    /// width of encoded nodes for a given raw feature width
    pub fn get_node_output_dim(&self, node_feature_dim: usize) -> usize {
        match &self.node_hidden_sizes {
            Some(sizes) if !sizes.is_empty() => sizes[sizes.len() - 1],
            _ => node_feature_dim,
        }
    }

    /// width of encoded edges, 0 if there are no edge features
    pub fn get_edge_output_dim(&self, edge_feature_dim: usize) -> usize {
        if edge_feature_dim == 0 {
            return 0;
        }
        match &self.edge_hidden_sizes {
            Some(sizes) if !sizes.is_empty() => sizes[sizes.len() - 1],
            _ => edge_feature_dim,
        }
    }
} // end of impl EncoderConfig

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig { node_hidden_sizes: Some(vec![32]), edge_hidden_sizes: None }
    }
}

/// Parameters of the propagation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// width of node states
    pub node_state_dim: usize,
    /// message network sizes, the last one is the message dimension
    pub edge_hidden_sizes: Vec<usize>,
    /// node update network hidden sizes, node_state_dim is appended as output size
    pub node_hidden_sizes: Vec<usize>,
    /// number of propagation rounds
    pub n_prop_layers: usize,
    /// all rounds use the same layer
    pub share_prop_params: bool,
    /// variance scale of message network initialization
    pub edge_net_init_scale: f64,
    pub node_update_type: NodeUpdateType,
    /// also send messages from destination to source
    pub use_reverse_direction: bool,
    /// reverse messages use their own network
    pub reverse_dir_param_different: bool,
    /// layer norm on aggregated messages and node update output
    pub layer_norm: bool,
    /// only used by the matching model
    pub similarity: Similarity,
} // end of PropagationConfig

impl Default for PropagationConfig {
    fn default() -> Self {
        let node_state_dim = 32;
        PropagationConfig {
            node_state_dim,
            edge_hidden_sizes: vec![node_state_dim * 2, node_state_dim * 2],
            node_hidden_sizes: vec![node_state_dim * 2],
            n_prop_layers: 5,
            share_prop_params: true,
            edge_net_init_scale: 0.1,
            node_update_type: NodeUpdateType::Gru,
            use_reverse_direction: true,
            reverse_dir_param_different: false,
            layer_norm: false,
            similarity: Similarity::DotProduct,
        }
    }
}

/// Parameters of the graph aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// node network sizes, last one is the graph vector dimension before transform
    pub node_hidden_sizes: Vec<usize>,
    /// optional network applied on aggregated vectors
    pub graph_transform_sizes: Option<Vec<usize>>,
    /// gate node contributions
    pub gated: bool,
    pub aggregation_type: AggregationType,
}

impl AggregatorConfig {
    /// dimension of graph vectors
    pub fn get_graph_vector_dim(&self) -> usize {
        match &self.graph_transform_sizes {
            Some(sizes) if !sizes.is_empty() => sizes[sizes.len() - 1],
            _ => self.node_hidden_sizes.last().copied().unwrap_or(0),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let graph_rep_dim = 128;
        AggregatorConfig {
            node_hidden_sizes: vec![graph_rep_dim],
            graph_transform_sizes: Some(vec![graph_rep_dim]),
            gated: true,
            aggregation_type: AggregationType::Sum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub encoder: EncoderConfig,
    pub propagation: PropagationConfig,
    pub aggregator: AggregatorConfig,
    pub model_type: ModelType,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            encoder: EncoderConfig::default(),
            propagation: PropagationConfig::default(),
            aggregator: AggregatorConfig::default(),
            model_type: ModelType::Matching,
        }
    }
}

impl ModelConfig {
    /// checks sizes and dimension compatibility of all parts for given input feature dimensions
    pub fn validate(&self, node_feature_dim: usize, edge_feature_dim: usize) -> anyhow::Result<()> {
        let prop = &self.propagation;
        if node_feature_dim == 0 {
            return config_error("node features must have a positive dimension");
        }
        if prop.node_state_dim == 0 {
            return config_error("node_state_dim must be positive");
        }
        if prop.n_prop_layers == 0 {
            return config_error("n_prop_layers must be positive");
        }
        if prop.edge_hidden_sizes.is_empty() {
            return config_error("propagation edge_hidden_sizes must not be empty");
        }
        if !(prop.edge_net_init_scale > 0.) {
            return config_error("edge_net_init_scale must be positive");
        }
        let sizes_ok = |sizes: &Option<Vec<usize>>| sizes.as_ref().map_or(true, |s| s.iter().all(|d| *d > 0));
        if !sizes_ok(&self.encoder.node_hidden_sizes) || !sizes_ok(&self.encoder.edge_hidden_sizes) {
            return config_error("encoder sizes must be positive");
        }
        if prop.edge_hidden_sizes.iter().chain(prop.node_hidden_sizes.iter()).any(|d| *d == 0) {
            return config_error("propagation sizes must be positive");
        }
        let encoded_dim = self.encoder.get_node_output_dim(node_feature_dim);
        if encoded_dim != prop.node_state_dim {
            log::error!("encoded node dimension {} differs from node_state_dim {}", encoded_dim, prop.node_state_dim);
            return Err(anyhow!("encoded node dimension {} differs from node_state_dim {}", encoded_dim, prop.node_state_dim));
        }
        if self.encoder.edge_hidden_sizes.as_ref().map_or(false, |s| !s.is_empty()) && edge_feature_dim == 0 {
            log::info!("encoder has an edge network but batches have no edge features, it will not be used");
        }
        let agg = &self.aggregator;
        if agg.node_hidden_sizes.is_empty() || agg.node_hidden_sizes.iter().any(|d| *d == 0) {
            return config_error("aggregator node_hidden_sizes must be a non empty list of positive sizes");
        }
        if !sizes_ok(&agg.graph_transform_sizes) {
            return config_error("aggregator graph_transform_sizes must be positive");
        }
        Ok(())
    } // end of validate
} // end of impl ModelConfig

/// Parameters of the graph edit distance dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// range of number of nodes, bounds included
    pub n_nodes_range: (usize, usize),
    /// range of edge probability
    pub p_edge_range: (f64, f64),
    /// number of edge substitutions giving a similar graph
    pub n_changes_positive: usize,
    /// number of edge substitutions giving a dissimilar graph
    pub n_changes_negative: usize,
    /// number of pairs (or triplets) of the fixed validation set
    pub validation_dataset_size: usize,
    pub node_feature_dim: usize,
    pub edge_feature_dim: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            n_nodes_range: (20, 20),
            p_edge_range: (0.2, 0.2),
            n_changes_positive: 1,
            n_changes_negative: 10,
            validation_dataset_size: 1000,
            node_feature_dim: 2,
            edge_feature_dim: 2,
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let (n_min, n_max) = self.n_nodes_range;
        if n_min < 2 || n_min > n_max {
            return config_error("n_nodes_range must satisfy 2 <= min <= max");
        }
        let (p_min, p_max) = self.p_edge_range;
        if !(0. ..=1.).contains(&p_min) || !(0. ..=1.).contains(&p_max) || p_min > p_max {
            return config_error("p_edge_range must satisfy 0 <= min <= max <= 1");
        }
        if self.n_changes_positive >= self.n_changes_negative {
            log::warn!("n_changes_positive {} not less than n_changes_negative {}", self.n_changes_positive, self.n_changes_negative);
        }
        if self.node_feature_dim == 0 {
            return config_error("dataset node_feature_dim must be positive");
        }
        Ok(())
    }
} // end of impl DatasetConfig

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// number of pairs or triplets per step
    pub batch_size: usize,
    pub learning_rate: f64,
    pub mode: TrainingMode,
    pub loss: LossType,
    pub margin: f64,
    /// weight of 0.5 * mean squared graph vector entries in the loss
    pub graph_vec_regularizer_weight: f64,
    /// gradients are clipped to this global norm
    pub clip_value: f64,
    pub n_training_steps: usize,
    /// metrics are averaged and logged every print_after steps
    pub print_after: usize,
    /// validation runs every eval_after * print_after steps
    pub eval_after: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 20,
            learning_rate: 1.0E-3,
            mode: TrainingMode::Pair,
            loss: LossType::Margin,
            margin: 1.0,
            graph_vec_regularizer_weight: 1.0E-6,
            clip_value: 10.0,
            n_training_steps: 10000,
            print_after: 100,
            eval_after: 10,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            return config_error("training batch_size must be positive");
        }
        if !(self.learning_rate > 0.) {
            return config_error("learning_rate must be positive");
        }
        if !(self.clip_value > 0.) {
            return config_error("clip_value must be positive");
        }
        if self.print_after == 0 || self.eval_after == 0 {
            return config_error("print_after and eval_after must be positive");
        }
        if self.graph_vec_regularizer_weight < 0. || self.margin < 0. {
            return config_error("graph_vec_regularizer_weight and margin must be non negative");
        }
        Ok(())
    }
} // end of impl TrainingConfig

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub batch_size: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig { batch_size: 20 }
    }
}

/// Everything needed to build, train and evaluate a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub data: DatasetConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: ModelConfig::default(),
            data: DatasetConfig::default(),
            training: TrainingConfig::default(),
            evaluation: EvaluationConfig::default(),
            seed: 8,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.data.validate()?;
        self.model.validate(self.data.node_feature_dim, self.data.edge_feature_dim)?;
        self.training.validate()?;
        if self.evaluation.batch_size == 0 {
            return config_error("evaluation batch_size must be positive");
        }
        Ok(())
    }
} // end of impl Config

fn config_error(msg: &str) -> anyhow::Result<()> {
    log::error!("configuration error : {}", msg);
    Err(anyhow!("configuration error : {}", msg))
}

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn default_config_is_valid() {
        log_init_test();
        //
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.model.aggregator.get_graph_vector_dim(), 128);
        assert_eq!(config.model.encoder.get_node_output_dim(2), 32);
        assert_eq!(config.model.encoder.get_edge_output_dim(2), 2);
        assert_eq!(config.model.encoder.get_edge_output_dim(0), 0);
    }

    #[test]
    fn unknown_names_rejected() {
        log_init_test();
        //
        assert!("lstm".parse::<NodeUpdateType>().is_err());
        assert!("manhattan".parse::<Similarity>().is_err());
        assert!("siamese".parse::<ModelType>().is_err());
        assert!("contrastive".parse::<LossType>().is_err());
        assert!("quadruplet".parse::<TrainingMode>().is_err());
        assert!("Sum".parse::<AggregationType>().is_err());
        //
        assert_eq!("residual".parse::<NodeUpdateType>().unwrap(), NodeUpdateType::Residual);
        assert_eq!("dotproduct".parse::<Similarity>().unwrap(), Similarity::DotProduct);
        assert_eq!("embedding".parse::<ModelType>().unwrap(), ModelType::Embedding);
        assert_eq!("hamming".parse::<LossType>().unwrap(), LossType::Hamming);
        assert_eq!("triplet".parse::<TrainingMode>().unwrap(), TrainingMode::Triplet);
        // names survive display
        for s in [Similarity::Euclidean, Similarity::DotProduct, Similarity::Cosine] {
            assert_eq!(s.to_string().parse::<Similarity>().unwrap(), s);
        }
    }

    #[test]
    fn dimension_mismatch_rejected() {
        log_init_test();
        //
        let mut model = ModelConfig::default();
        // encoder output 32 but node states 16
        model.propagation.node_state_dim = 16;
        assert!(model.validate(2, 2).is_err());
        // no encoder, raw features must have node_state_dim width
        model.encoder.node_hidden_sizes = None;
        assert!(model.validate(2, 2).is_err());
        assert!(model.validate(16, 0).is_ok());
        model.propagation.edge_hidden_sizes.clear();
        assert!(model.validate(16, 0).is_err());
        //
        let mut data = DatasetConfig::default();
        data.n_nodes_range = (10, 5);
        assert!(data.validate().is_err());
        let mut training = TrainingConfig::default();
        training.clip_value = 0.;
        assert!(training.validate().is_err());
    }
} // end of mod tests
