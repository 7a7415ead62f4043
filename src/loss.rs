//! Distances, similarities and losses between graph vectors.
//!
//! All functions work row by row on (nb_rows, dim) tensors : row i of x is compared with row i of y,
//! results have one entry per row. Losses are differentiable, the exact hamming similarity is not.
//! Pair labels are +1 for similar graphs and -1 for dissimilar ones.

use anyhow::anyhow;

use candle_core::{DType, Tensor};

use crate::model::config::LossType;

fn check_same_shape(x: &Tensor, y: &Tensor) -> anyhow::Result<()> {
    if x.dims2()? != y.dims2()? {
        log::error!("row wise comparison of tensors of shape {:?} and {:?}", x.dims(), y.dims());
        return Err(anyhow!("row wise comparison of tensors of shape {:?} and {:?}", x.dims(), y.dims()));
    }
    Ok(())
}

/// sum over columns of (x - y)^2
pub fn euclidean_distance(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_shape(x, y)?;
    Ok(x.sub(y)?.sqr()?.sum(1)?)
}

/// mean over columns of tanh(x) * tanh(y), a differentiable proxy of the hamming similarity of sign vectors
pub fn approximate_hamming_similarity(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_shape(x, y)?;
    let (nrows, ncols) = x.dims2()?;
    if ncols == 0 {
        return Ok(Tensor::zeros(nrows, x.dtype(), x.device())?);
    }
    Ok(x.tanh()?.mul(&y.tanh()?)?.mean(1)?)
}

/// fraction of columns where x and y have the same sign (x > 0 == y > 0)
pub fn exact_hamming_similarity(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_shape(x, y)?;
    let (nrows, ncols) = x.dims2()?;
    if ncols == 0 {
        return Ok(Tensor::zeros(nrows, x.dtype(), x.device())?);
    }
    let x_pos = x.gt(&x.zeros_like()?)?;
    let y_pos = y.gt(&y.zeros_like()?)?;
    Ok(x_pos.eq(&y_pos)?.to_dtype(DType::F64)?.mean(1)?.to_dtype(x.dtype())?)
}

/// Similarity used at evaluation : minus euclidean distance for margin loss, exact hamming similarity for hamming loss.
pub fn compute_similarity(loss_type: LossType, x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    match loss_type {
        LossType::Margin => Ok(euclidean_distance(x, y)?.neg()?),
        LossType::Hamming => exact_hamming_similarity(x, y),
    }
}

/// Loss of each pair (x_i, y_i) with label +1 or -1.
/// - margin : max(0, margin - label * (1 - d(x, y)))
/// - hamming : 0.25 * (label - s(x, y))^2
pub fn pairwise_loss(x: &Tensor, y: &Tensor, labels: &Tensor, loss_type: LossType, margin: f64) -> anyhow::Result<Tensor> {
    let nb_labels = labels.dims1()?;
    let (nb_pairs, _) = x.dims2()?;
    if nb_labels != nb_pairs {
        log::error!("pairwise_loss : {} labels for {} pairs", nb_labels, nb_pairs);
        return Err(anyhow!("pairwise_loss : {} labels for {} pairs", nb_labels, nb_pairs));
    }
    let loss = match loss_type {
        LossType::Margin => {
            let d = euclidean_distance(x, y)?;
            let signed = labels.mul(&d.affine(-1., 1.)?)?;
            signed.affine(-1., margin)?.relu()?
        }
        LossType::Hamming => {
            let s = approximate_hamming_similarity(x, y)?;
            labels.sub(&s)?.sqr()?.affine(0.25, 0.)?
        }
    };
    Ok(loss)
} // end of pairwise_loss

/// Loss of each triplet, x_1 should be closer to y than x_2 to z.
/// - margin : max(0, margin + d(x_1, y) - d(x_2, z))
/// - hamming : 0.125 * ((s(x_1, y) - 1)^2 + (s(x_2, z) + 1)^2)
pub fn triplet_loss(x_1: &Tensor, y: &Tensor, x_2: &Tensor, z: &Tensor, loss_type: LossType, margin: f64) -> anyhow::Result<Tensor> {
    check_same_shape(x_1, x_2)?;
    let loss = match loss_type {
        LossType::Margin => {
            let d_1 = euclidean_distance(x_1, y)?;
            let d_2 = euclidean_distance(x_2, z)?;
            d_1.sub(&d_2)?.affine(1., margin)?.relu()?
        }
        LossType::Hamming => {
            let s_1 = approximate_hamming_similarity(x_1, y)?;
            let s_2 = approximate_hamming_similarity(x_2, z)?;
            let a = s_1.affine(1., -1.)?.sqr()?;
            let b = s_2.affine(1., 1.)?.sqr()?;
            a.add(&b)?.affine(0.125, 0.)?
        }
    };
    Ok(loss)
} // end of triplet_loss

/// Splits rows into n_splits tensors, split i holding rows i, i + n_splits, i + 2 * n_splits ...
/// Graph vectors of packed pairs give (x, y), of packed triplets (x_1, y, x_2, z).
pub fn reshape_and_split(t: &Tensor, n_splits: usize) -> anyhow::Result<Vec<Tensor>> {
    let (nrows, ncols) = t.dims2()?;
    if n_splits == 0 || nrows % n_splits != 0 {
        log::error!("cannot split {} rows in {} parts", nrows, n_splits);
        return Err(anyhow!("cannot split {} rows in {} parts", nrows, n_splits));
    }
    let grouped = t.reshape((nrows / n_splits, n_splits, ncols))?;
    let splits = (0..n_splits)
        .map(|i| Ok(grouped.narrow(1, i, 1)?.squeeze(1)?))
        .collect::<anyhow::Result<Vec<Tensor>>>()?;
    Ok(splits)
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;
    use candle_core::Device;
    use ndarray::{arr1, arr2, Array2};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn to_tensor(a: &Array2<f64>) -> Tensor {
        array2_to_tensor(&a.view(), &Device::Cpu).unwrap()
    }

    fn values(t: &Tensor) -> Vec<f64> {
        tensor_to_array1::<f64>(t).unwrap().to_vec()
    }

    #[test]
    fn distances_and_similarities() {
        log_init_test();
        //
        let x = to_tensor(&arr2(&[[1., -2.], [0.5, 0.5]]));
        let y = to_tensor(&arr2(&[[0., 0.], [0.5, -0.5]]));
        assert_eq!(values(&euclidean_distance(&x, &y).unwrap()), vec![5f64, 1.]);
        // 0 is not positive : row 0 has (1>0, 0>0) different, (-2>0, 0>0) equal
        assert_eq!(values(&exact_hamming_similarity(&x, &y).unwrap()), vec![0.5f64, 0.5]);
        let approx = values(&approximate_hamming_similarity(&x, &y).unwrap());
        let expected: f64 = 0.5 * (0.5f64.tanh() * 0.5f64.tanh() - 0.5f64.tanh() * 0.5f64.tanh());
        assert!(approx[0].abs() < 1.0E-12);
        assert!((approx[1] - expected).abs() < 1.0E-12);
        let sim = values(&compute_similarity(LossType::Margin, &x, &y).unwrap());
        assert_eq!(sim, vec![-5f64, -1.]);
        let bad = to_tensor(&arr2(&[[1., 2., 3.]]));
        assert!(euclidean_distance(&x, &bad).is_err());
    }

    #[test]
    fn pair_and_triplet_losses() {
        log_init_test();
        //
        let x = to_tensor(&arr2(&[[0., 0.], [0., 0.]]));
        let y = to_tensor(&arr2(&[[1., 1.], [0.5, 0.]]));
        let labels = array1_to_tensor(&arr1(&[1f64, -1.]).view(), &Device::Cpu).unwrap();
        // d = 2 and 0.25
        let loss = values(&pairwise_loss(&x, &y, &labels, LossType::Margin, 1.).unwrap());
        // max(0, 1 - (1 - 2)) = 2, max(0, 1 + (1 - 0.25)) = 1.75
        assert!((loss[0] - 2f64).abs() < 1.0E-12);
        assert!((loss[1] - 1.75f64).abs() < 1.0E-12);
        // x = 0 gives s = 0 and loss 0.25 * label^2
        let loss = values(&pairwise_loss(&x, &y, &labels, LossType::Hamming, 1.).unwrap());
        assert!(loss.iter().all(|l| (l - 0.25f64).abs() < 1.0E-12));
        let one_label = array1_to_tensor(&arr1(&[1f64]).view(), &Device::Cpu).unwrap();
        assert!(pairwise_loss(&x, &y, &one_label, LossType::Margin, 1.).is_err());
        //
        let x_1 = to_tensor(&arr2(&[[0., 0.]]));
        let y = to_tensor(&arr2(&[[1., 0.]]));
        let x_2 = to_tensor(&arr2(&[[0., 0.]]));
        let z = to_tensor(&arr2(&[[3., 0.]]));
        let loss = values(&triplet_loss(&x_1, &y, &x_2, &z, LossType::Margin, 1.).unwrap());
        // max(0, 1 + 1 - 9)
        assert_eq!(loss[0], 0f64);
        let loss = values(&triplet_loss(&x_1, &z, &x_2, &y, LossType::Margin, 1.).unwrap());
        assert!((loss[0] - 9f64).abs() < 1.0E-12);
        let loss = values(&triplet_loss(&x_1, &y, &x_2, &z, LossType::Hamming, 1.).unwrap());
        // s = 0 for both pairs : 0.125 * (1 + 1)
        assert!((loss[0] - 0.25f64).abs() < 1.0E-12);
    } // end of pair_and_triplet_losses

    #[test]
    fn margin_loss_gradient() {
        log_init_test();
        // d = 4 for a similar pair : loss = margin - (1 - d) = 4, d loss / d x = 2 (x - y)
        let x = candle_core::Var::from_tensor(&to_tensor(&arr2(&[[2., 0.]]))).unwrap();
        let y = to_tensor(&arr2(&[[0., 0.]]));
        let labels = array1_to_tensor(&arr1(&[1f64]).view(), &Device::Cpu).unwrap();
        let loss = pairwise_loss(x.as_tensor(), &y, &labels, LossType::Margin, 1.).unwrap();
        assert_eq!(values(&loss), vec![4f64]);
        let grads = loss.sum_all().unwrap().backward().unwrap();
        let grad = tensor_to_array2::<f64>(grads.get(x.as_tensor()).unwrap()).unwrap();
        assert_eq!(grad, arr2(&[[4f64, 0.]]));
    }

    #[test]
    fn split_interleaved_rows() {
        log_init_test();
        //
        let t = to_tensor(&Array2::from_shape_fn((6, 1), |(i, _)| i as f64));
        let column = |s: &Tensor| tensor_to_array2::<f64>(s).unwrap().column(0).to_vec();
        let splits = reshape_and_split(&t, 2).unwrap();
        assert_eq!(column(&splits[0]), vec![0f64, 2., 4.]);
        assert_eq!(column(&splits[1]), vec![1f64, 3., 5.]);
        let splits = reshape_and_split(&t, 3).unwrap();
        assert_eq!(column(&splits[2]), vec![2f64, 5.]);
        assert!(reshape_and_split(&t, 4).is_err());
    }
} // end of mod tests
