//! Batch losses and validation of a model.

use anyhow::anyhow;

use candle_core::Tensor;
use ndarray::Array1;

use crate::dataset::{EditDistanceSampler, FixedDataset};
use crate::graph::graphdata::GraphData;
use crate::loss::{compute_similarity, pairwise_loss, reshape_and_split, triplet_loss};
use crate::model::config::{LossType, TrainingConfig, TrainingMode};
use crate::model::net::GraphNet;
use crate::nn::real::{real, Real};
use crate::nn::tensor::{array1_to_tensor, scalar_value, tensor_to_array1};
use crate::validation::metrics::{auc, triplet_accuracy};

/// guard on the number of positive and negative pairs
const COUNT_EPSILON: f64 = 1.0E-8;

/// A batch of training data
pub enum TrainingBatch<F> {
    /// graphs packed as (x, y, ...) and one label per pair
    Pairs { graphs: GraphData<F>, labels: Array1<F> },
    /// graphs packed as (x, y, x, z, ...)
    Triplets { graphs: GraphData<F> },
}

impl<F: Real> TrainingBatch<F> {
    pub fn get_graphs(&self) -> &GraphData<F> {
        match self {
            TrainingBatch::Pairs { graphs, .. } => graphs,
            TrainingBatch::Triplets { graphs } => graphs,
        }
    }

    pub fn get_mode(&self) -> TrainingMode {
        match self {
            TrainingBatch::Pairs { .. } => TrainingMode::Pair,
            TrainingBatch::Triplets { .. } => TrainingMode::Triplet,
        }
    }
}

/// loss of a batch and similarity statistics
#[derive(Debug, Copy, Clone)]
pub struct BatchStats<F> {
    /// mean pair or triplet loss plus graph vector regularization
    pub loss: F,
    /// mean of squared graph vector entries
    pub graph_vec_scale: F,
    /// mean similarity of similar pairs
    pub sim_pos: F,
    /// mean similarity of dissimilar pairs
    pub sim_neg: F,
}

impl<F: Real> BatchStats<F> {
    pub fn get_sim_diff(&self) -> F {
        self.sim_pos - self.sim_neg
    }
}

// mean similarity of pairs with positive and with negative label
fn similarity_by_label<F: Real>(sim: &Array1<F>, labels: &Array1<F>) -> (F, F) {
    let (mut sum_pos, mut n_pos, mut sum_neg, mut n_neg) = (F::zero(), F::zero(), F::zero(), F::zero());
    for (s, l) in sim.iter().zip(labels.iter()) {
        if *l > F::zero() {
            sum_pos += *s;
            n_pos += F::one();
        } else {
            sum_neg += *s;
            n_neg += F::one();
        }
    }
    let epsil = real::<F>(COUNT_EPSILON);
    (sum_pos / (n_pos + epsil), sum_neg / (n_neg + epsil))
}

/// Runs model on batch. Returns the loss as a scalar tensor to differentiate, with the batch statistics.
pub fn compute_batch_loss<F: Real>(model: &GraphNet<F>, config: &TrainingConfig, batch: &TrainingBatch<F>) -> anyhow::Result<(Tensor, BatchStats<F>)> {
    let graph_vectors = model.forward_tensor(batch.get_graphs())?;
    let (item_losses, sim_pos, sim_neg) = match batch {
        TrainingBatch::Pairs { labels, .. } => {
            let splits = reshape_and_split(&graph_vectors, 2)?;
            let label_tensor = array1_to_tensor(&labels.view(), graph_vectors.device())?;
            let loss = pairwise_loss(&splits[0], &splits[1], &label_tensor, config.loss, config.margin)?;
            let sim = tensor_to_array1::<F>(&compute_similarity(config.loss, &splits[0], &splits[1])?)?;
            let (sim_pos, sim_neg) = similarity_by_label(&sim, labels);
            (loss, sim_pos, sim_neg)
        }
        TrainingBatch::Triplets { .. } => {
            let splits = reshape_and_split(&graph_vectors, 4)?;
            let loss = triplet_loss(&splits[0], &splits[1], &splits[2], &splits[3], config.loss, config.margin)?;
            let sim_1 = tensor_to_array1::<F>(&compute_similarity(config.loss, &splits[0], &splits[1])?)?;
            let sim_2 = tensor_to_array1::<F>(&compute_similarity(config.loss, &splits[2], &splits[3])?)?;
            (loss, sim_1.mean().unwrap_or_else(F::zero), sim_2.mean().unwrap_or_else(F::zero))
        }
    };
    let graph_vec_scale = graph_vectors.sqr()?.mean_all()?;
    let mut loss = item_losses.mean_all()?;
    if config.graph_vec_regularizer_weight > 0. {
        loss = loss.add(&graph_vec_scale.affine(config.graph_vec_regularizer_weight * 0.5, 0.)?)?;
    }
    let stats = BatchStats { loss: scalar_value::<F>(&loss)?, graph_vec_scale: scalar_value::<F>(&graph_vec_scale)?, sim_pos, sim_neg };
    Ok((loss, stats))
} // end of compute_batch_loss

/// Batch loss and statistics, without keeping the loss tensor.
pub fn compute_batch_stats<F: Real>(model: &GraphNet<F>, config: &TrainingConfig, batch: &TrainingBatch<F>) -> anyhow::Result<BatchStats<F>> {
    Ok(compute_batch_loss(model, config, batch)?.1)
}

/// Similarity of each pair of graphs packed as (x, y, x', y' ...)
pub fn score_pairs<F: Real>(model: &GraphNet<F>, loss_type: LossType, graphs: &GraphData<F>) -> anyhow::Result<Array1<F>> {
    let graph_vectors = model.forward_tensor(graphs)?;
    let splits = reshape_and_split(&graph_vectors, 2)?;
    tensor_to_array1::<F>(&compute_similarity(loss_type, &splits[0], &splits[1])?)
}

/// validation results
#[derive(Debug, Copy, Clone)]
pub struct EvaluationMetrics<F> {
    /// mean over batches of pair AUC
    pub pair_auc: F,
    /// mean over batches of triplet accuracy
    pub triplet_accuracy: F,
}

/// Evaluates model on all complete batches of a fixed dataset.
pub fn evaluate<F: Real, S: EditDistanceSampler>(
    model: &GraphNet<F>,
    loss_type: LossType,
    validation: &mut FixedDataset<S>,
    batch_size: usize,
) -> anyhow::Result<EvaluationMetrics<F>> {
    let pair_batches = validation.pair_batches::<F>(batch_size)?;
    let triplet_batches = validation.triplet_batches::<F>(batch_size)?;
    if pair_batches.is_empty() || triplet_batches.is_empty() {
        log::error!("evaluate : validation set of size {} has no complete batch of size {}", validation.get_dataset_size(), batch_size);
        return Err(anyhow!("validation set of size {} has no complete batch of size {}", validation.get_dataset_size(), batch_size));
    }
    //
    let mut aucs = Vec::<F>::with_capacity(pair_batches.len());
    for (graphs, labels) in &pair_batches {
        let sim = score_pairs(model, loss_type, graphs)?;
        aucs.push(auc(&sim.view(), &labels.view())?);
    }
    let mut accuracies = Vec::<F>::with_capacity(triplet_batches.len());
    for graphs in &triplet_batches {
        let graph_vectors = model.forward_tensor(graphs)?;
        let splits = reshape_and_split(&graph_vectors, 4)?;
        let sim_1 = tensor_to_array1::<F>(&compute_similarity(loss_type, &splits[0], &splits[1])?)?;
        let sim_2 = tensor_to_array1::<F>(&compute_similarity(loss_type, &splits[2], &splits[3])?)?;
        accuracies.push(triplet_accuracy(&sim_1.view(), &sim_2.view())?);
    }
    let pair_auc = Array1::from(aucs).mean().unwrap_or_else(F::zero);
    let triplet_accuracy = Array1::from(accuracies).mean().unwrap_or_else(F::zero);
    log::info!("validation : pair auc {:.4}, triplet accuracy {:.4}", pair_auc, triplet_accuracy);
    Ok(EvaluationMetrics { pair_auc, triplet_accuracy })
} // end of evaluate

#[cfg(test)]
mod tests {

    use super::*;
    use crate::dataset::ged::{FixedGraphEditDistanceDataset, GraphEditDistanceDataset};
    use crate::dataset::GraphSimilarityDataset;
    use crate::model::config::{DatasetConfig, ModelConfig, ModelType};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn small_setup(model_type: ModelType) -> (ModelConfig, DatasetConfig) {
        let mut model = ModelConfig::default();
        model.model_type = model_type;
        model.encoder.node_hidden_sizes = Some(vec![8]);
        model.propagation.node_state_dim = 8;
        model.propagation.edge_hidden_sizes = vec![16];
        model.propagation.node_hidden_sizes = vec![16];
        model.propagation.n_prop_layers = 2;
        model.aggregator.node_hidden_sizes = vec![8];
        model.aggregator.graph_transform_sizes = Some(vec![8]);
        let mut data = DatasetConfig::default();
        data.n_nodes_range = (8, 10);
        data.p_edge_range = (0.3, 0.3);
        data.n_changes_negative = 4;
        (model, data)
    }

    #[test]
    fn batch_stats_consistent() {
        log_init_test();
        //
        let (model_config, data_config) = small_setup(ModelType::Matching);
        let model = GraphNet::<f64>::new(&model_config, 2, 2, 3).unwrap();
        let mut dataset = GraphEditDistanceDataset::new(&data_config, true, 5).unwrap();
        let mut config = TrainingConfig::default();
        config.graph_vec_regularizer_weight = 0.;
        let (graphs, labels) = dataset.pair_batch(4).unwrap();
        let batch = TrainingBatch::Pairs { graphs, labels };
        let stats = compute_batch_stats(&model, &config, &batch).unwrap();
        assert!(stats.loss > 0f64);
        // margin similarity is minus a distance
        assert!(stats.sim_pos <= 0f64 && stats.sim_neg <= 0f64);
        // regularization adds half the graph vector scale times its weight
        config.graph_vec_regularizer_weight = 1.;
        let regularized = compute_batch_stats(&model, &config, &batch).unwrap();
        assert!((regularized.loss - stats.loss - 0.5f64 * stats.graph_vec_scale).abs() < 1.0E-10);
        // loss tensor holds the same value
        let (loss_tensor, _) = compute_batch_loss(&model, &config, &batch).unwrap();
        assert!((scalar_value::<f64>(&loss_tensor).unwrap() - regularized.loss).abs() < 1.0E-12);
        //
        config.mode = TrainingMode::Triplet;
        config.loss = LossType::Hamming;
        let triplets = TrainingBatch::Triplets { graphs: dataset.triplet_batch(3).unwrap() };
        assert_eq!(triplets.get_mode(), TrainingMode::Triplet);
        let stats = compute_batch_stats(&model, &config, &triplets).unwrap();
        assert!(stats.sim_pos >= 0f64 && stats.sim_pos <= 1.);
    } // end of batch_stats_consistent

    #[test]
    fn evaluation_in_range() {
        log_init_test();
        //
        let (model_config, data_config) = small_setup(ModelType::Embedding);
        let model = GraphNet::<f32>::new(&model_config, 2, 2, 3).unwrap();
        let mut validation = FixedGraphEditDistanceDataset::new(&data_config, true, 8, 1234).unwrap();
        let metrics = evaluate(&model, LossType::Margin, &mut validation, 4).unwrap();
        assert!(metrics.pair_auc >= 0f32 && metrics.pair_auc <= 1.);
        assert!(metrics.triplet_accuracy >= 0f32 && metrics.triplet_accuracy <= 1.);
        // scores of the first validation batch are the pair similarities
        let (graphs, labels) = &validation.pair_batches::<f32>(4).unwrap()[0];
        let scores = score_pairs(&model, LossType::Margin, graphs).unwrap();
        assert_eq!(scores.len(), labels.len());
        assert!(scores.iter().all(|s| *s <= 0f32));
        // batches larger than the validation set
        assert!(evaluate(&model, LossType::Margin, &mut validation, 9).is_err());
    }
} // end of mod tests
