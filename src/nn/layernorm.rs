//! Layer normalization over the feature axis, with a learned scale and offset.
//!
//! Written with differentiable tensor operations. The fused candle_nn kernel has no backward pass.

use anyhow::anyhow;

use candle_core::Tensor;

use super::init::Initializer;
use super::real::Real;
use super::store::ParamStore;

const LAYER_NORM_EPSILON: f64 = 1.0E-5;

pub struct LayerNorm {
    dim: usize,
    // shape (dim), init 1
    scale: Tensor,
    // shape (dim), init 0
    offset: Tensor,
}

impl LayerNorm {
    pub fn new<F: Real>(store: &mut ParamStore, prefix: &str, dim: usize) -> anyhow::Result<Self> {
        let scale = store.create::<F>(&format!("{}.weight", prefix), &[dim], dim, Initializer::Ones)?;
        let offset = store.create::<F>(&format!("{}.bias", prefix), &[dim], dim, Initializer::Zeros)?;
        Ok(LayerNorm { dim, scale, offset })
    }

    pub fn get_dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, x: &Tensor) -> anyhow::Result<Tensor> {
        let (nrows, ncols) = x.dims2()?;
        if ncols != self.dim {
            return Err(anyhow!("LayerNorm::forward, got {} features expected {}", ncols, self.dim));
        }
        if nrows == 0 || ncols == 0 {
            return Ok(x.clone());
        }
        let mean = x.mean_keepdim(1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(1)?;
        let normed = centered.broadcast_div(&(var + LAYER_NORM_EPSILON)?.sqrt()?)?;
        Ok(normed.broadcast_mul(&self.scale)?.broadcast_add(&self.offset)?)
    } // end of forward
} // end of impl LayerNorm

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;

    #[test]
    fn rows_normalized() {
        let mut store = ParamStore::new::<f64>(0);
        let norm = LayerNorm::new::<f64>(&mut store, "norm", 4).unwrap();
        let x = ndarray::arr2(&[[1., 2., 3., 4.], [10., 10., 10., 10.]]);
        let y = tensor_to_array2::<f64>(&norm.forward(&array2_to_tensor(&x.view(), store.get_device()).unwrap()).unwrap()).unwrap();
        let mean: f64 = y.row(0).sum() / 4.;
        let var: f64 = y.row(0).iter().map(|v| v * v).sum::<f64>() / 4.;
        assert!(mean.abs() < 1.0E-10);
        assert!((var - 1.).abs() < 1.0E-4);
        // constant row goes to offset
        assert!(y.row(1).iter().all(|v| v.abs() < 1.0E-10));
    }

    #[test]
    fn gradient_reaches_scale() {
        let mut store = ParamStore::new::<f32>(0);
        let norm = LayerNorm::new::<f32>(&mut store, "norm", 3).unwrap();
        let x = array2_to_tensor(&ndarray::arr2(&[[1f32, -2., 0.5]]).view(), store.get_device()).unwrap();
        let loss = norm.forward(&x).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let scale = store.get_var("norm.weight").unwrap().unwrap();
        assert!(grads.get(scale.as_tensor()).is_some());
    }
} // end of mod tests
