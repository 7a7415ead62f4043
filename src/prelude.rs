//! To ease access to most frequently used items

pub use crate::graph::{AggregationType, GraphData, Segments};

pub use crate::model::config::{
    AggregatorConfig, Config, DatasetConfig, EncoderConfig, EvaluationConfig, LossType, ModelConfig, ModelType, NodeUpdateType,
    PropagationConfig, Similarity, TrainingConfig, TrainingMode,
};
pub use crate::model::{ForwardOutput, GraphNet};

pub use crate::loss::{compute_similarity, pairwise_loss, triplet_loss};
pub use crate::validation::{auc, triplet_accuracy};

pub use crate::dataset::ged::{FixedGraphEditDistanceDataset, GraphEditDistanceDataset, PlainGraph};
pub use crate::dataset::kg::{FixedKnowledgeGraphDataset, KnowledgeGraphEditDistanceDataset, LabelEmbedding, LabeledGraph, TestKnowledgeGraphDataset};
pub use crate::dataset::{EditDistanceSampler, FixedDataset, GraphSimilarityDataset, FIXED_DATASET_SEED};

pub use crate::training::{evaluate, score_pairs, EvaluationMetrics, StepMetrics, Trainer, TrainingBatch};

pub use crate::io::bson::{dump_graph_vectors, dump_model, reload_graph_vectors, reload_model};
pub use crate::io::csv::{graph_from_csv, label_embedding_from_csv, labeled_graph_from_csv};

pub use crate::nn::real::Real;
pub use crate::nn::store::ParamStore;
