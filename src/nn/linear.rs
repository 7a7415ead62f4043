//! Multi layer perceptrons on [candle_nn::Linear].

use anyhow::anyhow;

use candle_core::Tensor;
use candle_nn::{Linear, Module};

use super::init::Initializer;
use super::real::Real;
use super::store::ParamStore;

/// A chain of affine layers with relu between layers, no activation after the last one.
/// The last size given at construction is the output dimension.
///
/// Layer k has parameters `prefix.k.weight` of shape (output_dim, input_dim) and `prefix.k.bias`, set to zero.
pub struct Mlp {
    input_dim: usize,
    sizes: Vec<usize>,
    layers: Vec<Linear>,
} // end of Mlp

impl Mlp {
    pub fn new<F: Real>(store: &mut ParamStore, prefix: &str, input_dim: usize, sizes: &[usize], init: Initializer) -> anyhow::Result<Self> {
        if sizes.is_empty() {
            log::error!("Mlp::new needs at least one layer size");
            return Err(anyhow!("Mlp::new needs at least one layer size"));
        }
        let mut layers = Vec::<Linear>::with_capacity(sizes.len());
        let mut fan_in = input_dim;
        for (k, size) in sizes.iter().enumerate() {
            let w = store.create::<F>(&format!("{}.{}.weight", prefix, k), &[*size, fan_in], fan_in, init)?;
            let b = store.create::<F>(&format!("{}.{}.bias", prefix, k), &[*size], fan_in, Initializer::Zeros)?;
            layers.push(Linear::new(w, Some(b)));
            fan_in = *size;
        }
        Ok(Mlp { input_dim, sizes: sizes.to_vec(), layers })
    } // end of new

    pub fn get_input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn get_output_dim(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn get_nb_layers(&self) -> usize {
        self.layers.len()
    }

    /// x has one row per item
    pub fn forward(&self, x: &Tensor) -> anyhow::Result<Tensor> {
        let (nrows, ncols) = x.dims2()?;
        if ncols != self.input_dim {
            log::error!("Mlp::forward, input dim {} , expected {}", ncols, self.input_dim);
            return Err(anyhow!("Mlp::forward, input dim {} , expected {}", ncols, self.input_dim));
        }
        if nrows == 0 {
            return Ok(Tensor::zeros((0, self.get_output_dim()), x.dtype(), x.device())?);
        }
        let mut h = self.layers[0].forward(x)?;
        for layer in &self.layers[1..] {
            h = layer.forward(&h.relu()?)?;
        }
        Ok(h)
    } // end of forward
} // end of impl Mlp

// end of mod tests
