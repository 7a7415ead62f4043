//! Training loop.
//!
//! Each step runs the model on a batch, differentiates the batch loss with respect to all parameters,
//! clips the gradient by its global norm and hands it to AdamW (weight decay 0, that is Adam).
//! A batch giving a non finite loss or gradient is an error and leaves the parameters untouched.

use anyhow::anyhow;

use cpu_time::ProcessTime;
use std::time::SystemTime;

use candle_core::backprop::GradStore;
use candle_core::{DType, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::Array1;

use super::evaluation::{compute_batch_loss, evaluate, score_pairs, BatchStats, EvaluationMetrics, TrainingBatch};
use crate::dataset::kg::TestKnowledgeGraphDataset;
use crate::dataset::{EditDistanceSampler, FixedDataset, GraphSimilarityDataset};
use crate::model::config::{TrainingConfig, TrainingMode};
use crate::model::net::GraphNet;
use crate::nn::real::{real, real_count, Real};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1.0E-8;

/// What a training step reports
#[derive(Debug, Copy, Clone)]
pub struct StepMetrics<F> {
    /// batch loss before the update
    pub loss: F,
    /// global norm of the gradient before clipping
    pub grad_scale: F,
    /// global norm of parameters after the step
    pub param_scale: F,
    pub graph_vec_scale: F,
    pub sim_pos: F,
    pub sim_neg: F,
    pub sim_diff: F,
}

impl<F: Real> StepMetrics<F> {
    fn new(stats: &BatchStats<F>, grad_scale: F, param_scale: F) -> Self {
        StepMetrics {
            loss: stats.loss,
            grad_scale,
            param_scale,
            graph_vec_scale: stats.graph_vec_scale,
            sim_pos: stats.sim_pos,
            sim_neg: stats.sim_neg,
            sim_diff: stats.get_sim_diff(),
        }
    }
} // end of impl StepMetrics

// mean of accumulated metrics
fn mean_metrics<F: Real>(metrics: &[StepMetrics<F>]) -> Option<StepMetrics<F>> {
    if metrics.is_empty() {
        return None;
    }
    let nb = real_count::<F>(metrics.len());
    let mean = |f: &dyn Fn(&StepMetrics<F>) -> F| metrics.iter().map(f).sum::<F>() / nb;
    Some(StepMetrics {
        loss: mean(&|m| m.loss),
        grad_scale: mean(&|m| m.grad_scale),
        param_scale: mean(&|m| m.param_scale),
        graph_vec_scale: mean(&|m| m.graph_vec_scale),
        sim_pos: mean(&|m| m.sim_pos),
        sim_neg: mean(&|m| m.sim_neg),
        sim_diff: mean(&|m| m.sim_diff),
    })
} // end of mean_metrics

/// Rescales the gradients of vars so that their global norm is at most clip_norm.
/// Returns the norm before clipping. Variables without gradient count as 0.
pub fn clip_by_global_norm(grads: &mut GradStore, vars: &[Var], clip_norm: f64) -> anyhow::Result<f64> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
    }
    let norm = sum_sq.sqrt();
    if norm > clip_norm {
        let scale = clip_norm / norm;
        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(grad) => grad.affine(scale, 0.)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(norm)
} // end of clip_by_global_norm

/// Trains a model on batches drawn from a dataset.
pub struct Trainer<F, D> {
    model: GraphNet<F>,
    config: TrainingConfig,
    dataset: D,
    /// the model variables, shared with the optimizer
    vars: Vec<Var>,
    optimizer: AdamW,
    /// number of steps done
    step: usize,
} // end of Trainer

impl<F: Real, D: GraphSimilarityDataset> Trainer<F, D> {
    pub fn new(model: GraphNet<F>, config: &TrainingConfig, dataset: D) -> anyhow::Result<Self> {
        config.validate()?;
        let vars = model.get_store().all_vars();
        let params = ParamsAdamW { lr: config.learning_rate, beta1: ADAM_BETA1, beta2: ADAM_BETA2, eps: ADAM_EPSILON, weight_decay: 0. };
        let optimizer = AdamW::new(vars.clone(), params)?;
        log::info!("trainer : {} parameters, mode {}, loss {}", model.nb_params(), config.mode, config.loss);
        Ok(Trainer { model, config: config.clone(), dataset, vars, optimizer, step: 0 })
    }

    pub fn get_model(&self) -> &GraphNet<F> {
        &self.model
    }

    pub fn into_model(self) -> GraphNet<F> {
        self.model
    }

    pub fn get_config(&self) -> &TrainingConfig {
        &self.config
    }

    /// number of training steps done
    pub fn get_nb_steps(&self) -> usize {
        self.step
    }

    /// draws a batch of batch_size pairs or triplets according to training mode
    pub fn next_batch(&mut self) -> anyhow::Result<TrainingBatch<F>> {
        let batch = match self.config.mode {
            TrainingMode::Pair => {
                let (graphs, labels) = self.dataset.pair_batch::<F>(self.config.batch_size)?;
                TrainingBatch::Pairs { graphs, labels }
            }
            TrainingMode::Triplet => TrainingBatch::Triplets { graphs: self.dataset.triplet_batch::<F>(self.config.batch_size)? },
        };
        Ok(batch)
    }

    /// draws a batch and trains on it
    pub fn train_step(&mut self) -> anyhow::Result<StepMetrics<F>> {
        let batch = self.next_batch()?;
        self.train_step_on(&batch)
    }

    /// one step on a given batch, metrics are those of the batch before the update
    pub fn train_step_on(&mut self, batch: &TrainingBatch<F>) -> anyhow::Result<StepMetrics<F>> {
        let (loss, stats) = compute_batch_loss(&self.model, &self.config, batch)?;
        if !stats.loss.is_finite() {
            log::error!("train_step : non finite loss {} at step {}", stats.loss, self.step);
            return Err(anyhow!("non finite loss {} at step {}", stats.loss, self.step));
        }
        let mut grads = loss.backward()?;
        let grad_norm = clip_by_global_norm(&mut grads, &self.vars, self.config.clip_value)?;
        if !grad_norm.is_finite() {
            log::error!("train_step : non finite gradient norm at step {}", self.step);
            return Err(anyhow!("non finite gradient norm at step {}", self.step));
        }
        self.optimizer.step(&grads)?;
        self.step += 1;
        Ok(StepMetrics::new(&stats, real::<F>(grad_norm), self.model.get_param_scale()?))
    } // end of train_step_on

    /// Runs n_training_steps steps. Averaged metrics are logged every print_after steps,
    /// the model is evaluated on validation (if any) every eval_after * print_after steps.
    /// Returns the successive evaluation results.
    pub fn train<S: EditDistanceSampler>(
        &mut self,
        mut validation: Option<&mut FixedDataset<S>>,
        eval_batch_size: usize,
    ) -> anyhow::Result<Vec<EvaluationMetrics<F>>> {
        let cpu_start = ProcessTime::now();
        let sys_start = SystemTime::now();
        //
        let print_after = self.config.print_after;
        let eval_every = self.config.eval_after * print_after;
        let mut accumulated = Vec::<StepMetrics<F>>::with_capacity(print_after);
        let mut evaluations = Vec::<EvaluationMetrics<F>>::new();
        for _ in 0..self.config.n_training_steps {
            accumulated.push(self.train_step()?);
            if self.step % print_after == 0 {
                if let Some(m) = mean_metrics(&accumulated) {
                    log::info!(
                        "iter {}, loss {:.4e}, grad_scale {:.4e}, param_scale {:.4e}, graph_vec_scale {:.4e}, sim_pos {:.4e}, sim_neg {:.4e}, sim_diff {:.4e}",
                        self.step,
                        m.loss,
                        m.grad_scale,
                        m.param_scale,
                        m.graph_vec_scale,
                        m.sim_pos,
                        m.sim_neg,
                        m.sim_diff
                    );
                }
                accumulated.clear();
                log::info!(
                    "sys time(s) {:.2e} cpu time(s) {:.2e}",
                    sys_start.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.),
                    cpu_start.elapsed().as_secs_f64()
                );
            }
            if self.step % eval_every == 0 {
                if let Some(fixed) = validation.as_deref_mut() {
                    let metrics = evaluate(&self.model, self.config.loss, fixed, eval_batch_size)?;
                    log::info!("iter {}, val/pair_auc {:.4}, val/triplet_acc {:.4}", self.step, metrics.pair_auc, metrics.triplet_accuracy);
                    evaluations.push(metrics);
                }
            }
        }
        log::info!(
            "training done, {} steps, sys time(s) {:.2e} cpu time(s) {:.2e}",
            self.step,
            sys_start.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.),
            cpu_start.elapsed().as_secs_f64()
        );
        Ok(evaluations)
    } // end of train

    /// similarity of each test pair, in the order of the test set
    pub fn score_test_pairs(&self, test_set: &TestKnowledgeGraphDataset) -> anyhow::Result<Array1<F>> {
        let graphs = test_set.pack_all::<F>()?;
        let similarities = score_pairs(&self.model, self.config.loss, &graphs)?;
        log::info!("scored {} test pairs", similarities.len());
        Ok(similarities)
    }
} // end of impl Trainer

// end of mod tests
