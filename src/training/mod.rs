//! Training and evaluation of graph similarity models.
//!
//! - evaluation : batch losses, pair AUC and triplet accuracy on a fixed dataset, pair scoring
//! - trainer : the training loop, AdamW on gradients clipped by global norm

pub mod evaluation;
pub mod trainer;

pub use evaluation::{compute_batch_loss, compute_batch_stats, evaluate, score_pairs, BatchStats, EvaluationMetrics, TrainingBatch};
pub use trainer::{clip_by_global_norm, StepMetrics, Trainer};
