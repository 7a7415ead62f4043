//! Cross graph attention.
//!
//! For a pair of graphs with node states X (N rows) and Y (M rows) we compute the similarity matrix S = sim(X, Y)
//! of shape (N, M) and
//! - a_x = softmax(S) along rows, attention_x = a_x.Y  : for each node of X a convex combination of nodes of Y
//! - a_y = softmax(S) along columns, attention_y = a_y^t.X : for each node of Y a convex combination of nodes of X
//!
//! In a batch, blocks (graphs) 2i and 2i+1 attend to each other. Pairs are independent and processed in parallel.
//! Results are written back at the nodes original positions so output rows follow input rows.

use anyhow::anyhow;

use candle_core::{Device, Tensor};
use ndarray::Array2;
use rayon::prelude::*;

use super::config::Similarity;
use crate::graph::segment::{gather_rows, scatter_rows, Segments};
use crate::nn::real::Real;
use crate::nn::tensor::{array2_to_tensor, index_tensor, tensor_to_array2};

/// guard on squared norms in cosine similarity
const COSINE_EPSILON: f64 = 1.0E-12;

/// squared norm of each row, as a column
fn row_sq_norms(x: &Tensor) -> anyhow::Result<Tensor> {
    Ok(x.sqr()?.sum_keepdim(1)?)
}

fn check_same_dim(x: &Tensor, y: &Tensor) -> anyhow::Result<()> {
    let (_, x_dim) = x.dims2()?;
    let (_, y_dim) = y.dims2()?;
    if x_dim != y_dim {
        log::error!("similarity between vectors of dim {} and {}", x_dim, y_dim);
        return Err(anyhow!("similarity between vectors of dim {} and {}", x_dim, y_dim));
    }
    Ok(())
}

/// s\[i,j\] = - |x_i - y_j|^2, computed as 2 x_i.y_j - |x_i|^2 - |y_j|^2
pub fn pairwise_euclidean_similarity(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_dim(x, y)?;
    let xy = x.matmul(&y.t()?)?;
    let x2 = row_sq_norms(x)?;
    let y2 = row_sq_norms(y)?;
    Ok(xy.affine(2., 0.)?.broadcast_sub(&x2)?.broadcast_sub(&y2.t()?)?)
}

/// s\[i,j\] = x_i.y_j
pub fn pairwise_dot_product_similarity(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_dim(x, y)?;
    Ok(x.matmul(&y.t()?)?)
}

fn l2_normalize_rows(x: &Tensor) -> anyhow::Result<Tensor> {
    let sq_norms = row_sq_norms(x)?;
    let floor = sq_norms.ones_like()?.affine(COSINE_EPSILON, 0.)?;
    Ok(x.broadcast_div(&sq_norms.maximum(&floor)?.sqrt()?)?)
}

/// s\[i,j\] = x_i.y_j / (|x_i| |y_j|), squared norms below 1e-12 are replaced by 1e-12
pub fn pairwise_cosine_similarity(x: &Tensor, y: &Tensor) -> anyhow::Result<Tensor> {
    check_same_dim(x, y)?;
    let xn = l2_normalize_rows(x)?;
    let yn = l2_normalize_rows(y)?;
    Ok(xn.matmul(&yn.t()?)?)
}

pub fn pairwise_similarity(x: &Tensor, y: &Tensor, similarity: Similarity) -> anyhow::Result<Tensor> {
    match similarity {
        Similarity::Euclidean => pairwise_euclidean_similarity(x, y),
        Similarity::DotProduct => pairwise_dot_product_similarity(x, y),
        Similarity::Cosine => pairwise_cosine_similarity(x, y),
    }
}

/// softmax along dim, each lane along dim sums to 1
pub fn softmax(s: &Tensor, dim: usize) -> anyhow::Result<Tensor> {
    Ok(candle_nn::ops::softmax(s, dim)?)
}

/// Attention between two graphs.
pub struct CrossAttention {
    /// (N, D) for each node of x, attention weighted nodes of y
    pub attention_x: Tensor,
    /// (M, D) for each node of y, attention weighted nodes of x
    pub attention_y: Tensor,
    /// (N, M) rows sum to 1
    pub a_x: Tensor,
    /// (N, M) columns sum to 1
    pub a_y: Tensor,
}

/// An empty graph on one side gives zero attention on the other side.
pub fn compute_cross_attention(x: &Tensor, y: &Tensor, similarity: Similarity) -> anyhow::Result<CrossAttention> {
    let s = pairwise_similarity(x, y, similarity)?;
    let (n, m) = s.dims2()?;
    if n == 0 || m == 0 {
        return Ok(CrossAttention { attention_x: x.zeros_like()?, attention_y: y.zeros_like()?, a_x: s.clone(), a_y: s });
    }
    let a_x = softmax(&s, 1)?;
    let a_y = softmax(&s, 0)?;
    let attention_x = a_x.matmul(y)?;
    let attention_y = a_y.t()?.matmul(x)?;
    Ok(CrossAttention { attention_x, attention_y, a_x, a_y })
}

fn check_pairs(n_blocks: usize) -> anyhow::Result<()> {
    if n_blocks % 2 != 0 {
        log::error!("cross graph attention needs an even number of graphs, got {}", n_blocks);
        return Err(anyhow!("cross graph attention needs an even number of graphs, got {}", n_blocks));
    }
    Ok(())
}

// attention of each pair of blocks, in pair order
fn pair_attentions(data: &Tensor, blocks: &Segments, similarity: Similarity, device: &Device) -> anyhow::Result<Vec<CrossAttention>> {
    (0..blocks.get_nb_segments() / 2)
        .into_par_iter()
        .map(|i| {
            let x = gather_rows(data, &index_tensor(blocks.get_members(2 * i), device)?)?;
            let y = gather_rows(data, &index_tensor(blocks.get_members(2 * i + 1), device)?)?;
            compute_cross_attention(&x, &y, similarity)
        })
        .collect::<anyhow::Result<Vec<CrossAttention>>>()
}

/// attention over all pairs of blocks given as segments, returns one row per input row
pub(crate) fn block_pair_attention(data: &Tensor, blocks: &Segments, similarity: Similarity) -> anyhow::Result<Tensor> {
    let n_blocks = blocks.get_nb_segments();
    check_pairs(n_blocks)?;
    let (nb_rows, _) = data.dims2()?;
    if nb_rows != blocks.get_nb_items() {
        return Err(anyhow!("block pair attention got {} rows, blocks hold {} items", nb_rows, blocks.get_nb_items()));
    }
    let device = data.device().clone();
    let pairs = pair_attentions(data, blocks, similarity, &device)?;
    // results in pair order and the rows they go to
    let mut rows = Vec::<Tensor>::with_capacity(n_blocks);
    let mut targets = Vec::<usize>::with_capacity(nb_rows);
    for (i, pair) in pairs.into_iter().enumerate() {
        rows.push(pair.attention_x);
        rows.push(pair.attention_y);
        targets.extend_from_slice(blocks.get_members(2 * i));
        targets.extend_from_slice(blocks.get_members(2 * i + 1));
    }
    if rows.is_empty() {
        return Ok(data.zeros_like()?);
    }
    scatter_rows(nb_rows, &index_tensor(&targets, &device)?, &Tensor::cat(&rows, 0)?)
} // end of block_pair_attention

/// Cross graph attention on a batch. Row r of data belongs to block block_idx\[r\],
/// blocks 2i and 2i+1 attend to each other. An odd n_blocks is an error.
pub fn batch_block_pair_attention(data: &Tensor, block_idx: &[usize], n_blocks: usize, similarity: Similarity) -> anyhow::Result<Tensor> {
    check_pairs(n_blocks)?;
    let blocks = Segments::new(block_idx, n_blocks, data.device())?;
    block_pair_attention(data, &blocks, similarity)
}

/// For each layer output, the (a_x, a_y) attention matrices of each pair of blocks.
/// Useful to visualize which nodes get matched.
pub fn build_matchings<F: Real>(
    layer_outputs: &[Array2<F>],
    block_idx: &[usize],
    n_blocks: usize,
    similarity: Similarity,
) -> anyhow::Result<Vec<Vec<(Array2<F>, Array2<F>)>>> {
    check_pairs(n_blocks)?;
    let device = Device::Cpu;
    let blocks = Segments::new(block_idx, n_blocks, &device)?;
    let mut matchings = Vec::with_capacity(layer_outputs.len());
    for h in layer_outputs {
        let data = array2_to_tensor(&h.view(), &device)?;
        let layer = pair_attentions(&data, &blocks, similarity, &device)?
            .iter()
            .map(|att| Ok((tensor_to_array2::<F>(&att.a_x)?, tensor_to_array2::<F>(&att.a_y)?)))
            .collect::<anyhow::Result<Vec<(Array2<F>, Array2<F>)>>>()?;
        matchings.push(layer);
    }
    Ok(matchings)
} // end of build_matchings

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::{arr2, Axis};
    use rand::Rng;
    use rand_xoshiro::rand_core::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn random_states(nrows: usize, ncols: usize, rng: &mut Xoshiro256PlusPlus) -> Array2<f64> {
        Array2::from_shape_fn((nrows, ncols), |_| rng.gen_range(-1.0..1.0))
    }

    fn to_tensor(a: &Array2<f64>) -> Tensor {
        array2_to_tensor(&a.view(), &Device::Cpu).unwrap()
    }

    fn to_array(t: &Tensor) -> Array2<f64> {
        tensor_to_array2::<f64>(t).unwrap()
    }

    #[test]
    fn similarities_known_values() {
        log_init_test();
        //
        let x = to_tensor(&arr2(&[[1., 0.], [0., 2.]]));
        let y = to_tensor(&arr2(&[[1., 1.]]));
        let eucl = to_array(&pairwise_euclidean_similarity(&x, &y).unwrap());
        assert!((eucl[[0, 0]] + 1f64).abs() < 1.0E-12);
        assert!((eucl[[1, 0]] + 2f64).abs() < 1.0E-12);
        let dot = to_array(&pairwise_dot_product_similarity(&x, &y).unwrap());
        assert_eq!(dot, arr2(&[[1.], [2.]]));
        let cosine = to_array(&pairwise_cosine_similarity(&x, &y).unwrap());
        let expected = 1f64 / 2f64.sqrt();
        assert!((cosine[[0, 0]] - expected).abs() < 1.0E-12);
        assert!((cosine[[1, 0]] - expected).abs() < 1.0E-12);
        // zero vector does not give NaN
        let zero = to_tensor(&Array2::<f64>::zeros((1, 2)));
        let cosine = to_array(&pairwise_cosine_similarity(&zero, &y).unwrap());
        assert_eq!(cosine[[0, 0]], 0f64);
        //
        let bad = to_tensor(&Array2::<f64>::zeros((1, 3)));
        assert!(pairwise_dot_product_similarity(&x, &bad).is_err());
    } // end of similarities_known_values

    #[test]
    fn cross_attention_n3_m5() {
        log_init_test();
        //
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1453);
        let x = to_tensor(&random_states(3, 4, &mut rng));
        let y = to_tensor(&random_states(5, 4, &mut rng));
        for similarity in [Similarity::Euclidean, Similarity::DotProduct, Similarity::Cosine] {
            let att = compute_cross_attention(&x, &y, similarity).unwrap();
            assert_eq!(att.a_x.dims(), &[3, 5]);
            assert_eq!(att.a_y.dims(), &[3, 5]);
            assert_eq!(att.attention_x.dims(), &[3, 4]);
            assert_eq!(att.attention_y.dims(), &[5, 4]);
            for row in to_array(&att.a_x).rows() {
                assert!((row.sum() - 1f64).abs() < 1.0E-10);
            }
            for col in to_array(&att.a_y).columns() {
                assert!((col.sum() - 1f64).abs() < 1.0E-10);
            }
        }
    } // end of cross_attention_n3_m5

    #[test]
    fn batch_attention_keeps_node_order() {
        log_init_test();
        //
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let data = random_states(8, 3, &mut rng);
        // blocks interleaved, block 0 has 3 nodes, block 1 has 5
        let block_idx = [0, 1, 0, 1, 1, 1, 0, 1];
        let attention = to_array(&batch_block_pair_attention(&to_tensor(&data), &block_idx, 2, Similarity::DotProduct).unwrap());
        assert_eq!(attention.dim(), (8, 3));
        // recompute on contiguous blocks
        let x = to_tensor(&data.select(Axis(0), &[0, 2, 6]));
        let y = to_tensor(&data.select(Axis(0), &[1, 3, 4, 5, 7]));
        let att = compute_cross_attention(&x, &y, Similarity::DotProduct).unwrap();
        let (att_x, att_y) = (to_array(&att.attention_x), to_array(&att.attention_y));
        for (k, r) in [0usize, 2, 6].iter().enumerate() {
            for d in 0..3 {
                assert!((attention[[*r, d]] - att_x[[k, d]]).abs() < 1.0E-12);
            }
        }
        for (k, r) in [1usize, 3, 4, 5, 7].iter().enumerate() {
            for d in 0..3 {
                assert!((attention[[*r, d]] - att_y[[k, d]]).abs() < 1.0E-12);
            }
        }
        // odd number of blocks
        assert!(batch_block_pair_attention(&to_tensor(&data), &[0, 1, 2, 0, 1, 2, 0, 1], 3, Similarity::DotProduct).is_err());
    } // end of batch_attention_keeps_node_order

    #[test]
    fn matchings_per_layer() {
        log_init_test();
        //
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
        let layers = vec![random_states(5, 2, &mut rng), random_states(5, 2, &mut rng)];
        let matchings = build_matchings(&layers, &[0, 0, 1, 1, 1], 2, Similarity::Euclidean).unwrap();
        assert_eq!(matchings.len(), 2);
        assert_eq!(matchings[0].len(), 1);
        assert_eq!(matchings[1][0].0.dim(), (2, 3));
    }

    #[test]
    fn attention_is_differentiable() {
        log_init_test();
        //
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(71);
        let data = candle_core::Var::from_tensor(&to_tensor(&random_states(5, 3, &mut rng))).unwrap();
        let attention = batch_block_pair_attention(data.as_tensor(), &[0, 0, 1, 1, 1], 2, Similarity::Cosine).unwrap();
        let grads = attention.sqr().unwrap().sum_all().unwrap().backward().unwrap();
        let grad = to_array(grads.get(data.as_tensor()).unwrap());
        assert_eq!(grad.dim(), (5, 3));
        assert!(grad.iter().all(|g| g.is_finite()));
    }
} // end of mod tests
