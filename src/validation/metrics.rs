//! Evaluation metrics.
//!
//! - pair AUC : pairs are ranked by similarity, the area under the ROC curve of positive pairs is computed.
//! - triplet accuracy : fraction of triplets (g1, g2, g3) where g1 is more similar to g2 than to g3.

use anyhow::anyhow;

use ndarray::ArrayView1;

use crate::nn::real::{real, real_count, to_f64, Real};

/// number of thresholds used to approximate the ROC curve
const NB_AUC_THRESHOLDS: usize = 200;

/// Approximate area under the ROC curve.
/// Scores are rescaled to \[0,1\], labels are +1 (positive) or -1 (negative).
/// The ROC curve is sampled at NB_AUC_THRESHOLDS thresholds and integrated with the trapezoidal rule.
pub fn auc<F: Real>(scores: &ArrayView1<F>, labels: &ArrayView1<F>) -> anyhow::Result<F> {
    if scores.len() != labels.len() {
        log::error!("auc : {} scores for {} labels", scores.len(), labels.len());
        return Err(anyhow!("auc : {} scores for {} labels", scores.len(), labels.len()));
    }
    if scores.is_empty() {
        return Err(anyhow!("auc : no scores"));
    }
    let min = scores.fold(F::infinity(), |m, s| num_traits::Float::min(m, *s));
    let max = scores.fold(F::neg_infinity(), |m, s| num_traits::Float::max(m, *s));
    let scale = max - min + real::<F>(1.0E-8);
    let normalized: Vec<f64> = scores.iter().map(|s| to_f64((*s - min) / scale)).collect();
    let positive: Vec<bool> = labels.iter().map(|l| *l > F::zero()).collect();
    //
    let kepsilon = 1.0E-7;
    let mut thresholds = Vec::<f64>::with_capacity(NB_AUC_THRESHOLDS);
    thresholds.push(-kepsilon);
    for i in 0..NB_AUC_THRESHOLDS - 2 {
        thresholds.push((i + 1) as f64 / (NB_AUC_THRESHOLDS - 1) as f64);
    }
    thresholds.push(1. + kepsilon);
    //
    let epsilon = 1.0E-6;
    let rates: Vec<(f64, f64)> = thresholds
        .iter()
        .map(|t| {
            let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
            for (s, p) in normalized.iter().zip(positive.iter()) {
                match (*s > *t, *p) {
                    (true, true) => tp += 1,
                    (true, false) => fp += 1,
                    (false, false) => tn += 1,
                    (false, true) => fn_ += 1,
                }
            }
            let tpr = (tp as f64 + epsilon) / ((tp + fn_) as f64 + epsilon);
            let fpr = fp as f64 / ((fp + tn) as f64 + epsilon);
            (fpr, tpr)
        })
        .collect();
    let area: f64 = rates.windows(2).map(|w| (w[0].0 - w[1].0) * (w[0].1 + w[1].1) / 2.).sum();
    log::debug!("auc over {} pairs : {:.5e}", scores.len(), area);
    Ok(real::<F>(area))
} // end of auc

/// fraction of triplets with sim_1 > sim_2
pub fn triplet_accuracy<F: Real>(sim_1: &ArrayView1<F>, sim_2: &ArrayView1<F>) -> anyhow::Result<F> {
    if sim_1.len() != sim_2.len() {
        return Err(anyhow!("triplet_accuracy : {} and {} similarities", sim_1.len(), sim_2.len()));
    }
    if sim_1.is_empty() {
        return Err(anyhow!("triplet_accuracy : no triplet"));
    }
    let nb_ok = sim_1.iter().zip(sim_2.iter()).filter(|(a, b)| *a > *b).count();
    Ok(real_count::<F>(nb_ok) / real_count::<F>(sim_1.len()))
}

// end of mod tests
