//! Gated recurrent unit cell, used as a node update rule. This is the [candle_nn::rnn::GRU] cell
//! with inputs x (aggregated messages) and carried state h (node states) :
//! - r = sigmoid(x.Wir + b_ir + h.Whr + b_hr)
//! - z = sigmoid(x.Wiz + b_iz + h.Whz + b_hz)
//! - n = tanh(x.Win + b_in + r * (h.Whn + b_hn))
//! - h_new = z * h + (1 - z) * n

use anyhow::anyhow;

use candle_core::Tensor;
use candle_nn::rnn::{gru, GRUConfig, GRUState, GRU, RNN};

use super::init::Initializer;
use super::real::Real;
use super::store::ParamStore;

pub struct GruCell {
    input_dim: usize,
    hidden_dim: usize,
    cell: GRU,
} // end of GruCell

impl GruCell {
    /// Variables are created in the store with our initializers, then picked up by candle_nn under the names
    /// it expects (`prefix.weight_ih_l0` ...).
    pub fn new<F: Real>(store: &mut ParamStore, prefix: &str, input_dim: usize, hidden_dim: usize) -> anyhow::Result<Self> {
        let gates_dim = 3 * hidden_dim;
        let init = Initializer::TruncatedNormal;
        store.create::<F>(&format!("{}.weight_ih_l0", prefix), &[gates_dim, input_dim], input_dim, init)?;
        store.create::<F>(&format!("{}.weight_hh_l0", prefix), &[gates_dim, hidden_dim], hidden_dim, init)?;
        store.create::<F>(&format!("{}.bias_ih_l0", prefix), &[gates_dim], input_dim, Initializer::Zeros)?;
        store.create::<F>(&format!("{}.bias_hh_l0", prefix), &[gates_dim], hidden_dim, Initializer::Zeros)?;
        let cell = gru(input_dim, hidden_dim, GRUConfig::default(), store.var_builder().pp(prefix))?;
        Ok(GruCell { input_dim, hidden_dim, cell })
    }

    pub fn get_input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn get_hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// one step : returns new state, one row per item.
    pub fn forward(&self, inputs: &Tensor, state: &Tensor) -> anyhow::Result<Tensor> {
        let (nb_items, input_dim) = inputs.dims2()?;
        let (nb_states, hidden_dim) = state.dims2()?;
        if hidden_dim != self.hidden_dim || nb_states != nb_items || input_dim != self.input_dim {
            log::error!("GruCell::forward, state shape {:?}, inputs shape {:?}, hidden dim {}", state.dims(), inputs.dims(), self.hidden_dim);
            return Err(anyhow!(
                "GruCell::forward, state shape {:?} incompatible with inputs shape {:?} and hidden dim {}",
                state.dims(),
                inputs.dims(),
                self.hidden_dim
            ));
        }
        if nb_items == 0 {
            return Ok(state.clone());
        }
        let new_state = self.cell.step(inputs, &GRUState { h: state.clone() })?;
        Ok(new_state.h)
    } // end of forward
} // end of impl GruCell

#[cfg(test)]
mod tests {

    use super::*;
    use crate::nn::tensor::*;
    use ndarray::{arr2, Array1, Array2};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn gru_zero_params_keeps_half() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f64>(5);
        let gru = GruCell::new::<f64>(&mut store, "gru", 3, 2).unwrap();
        assert_eq!(store.nb_params(), 6 * 3 + 6 * 2 + 2 * 6);
        // with all parameters at 0, z = 0.5 and n = 0 so h_new = h/2
        let zeros = Array1::<f64>::zeros(store.nb_params());
        store.set_flat_params(&zeros.view()).unwrap();
        let inputs = array2_to_tensor(&arr2(&[[1., 2., 3.], [0., 0., 0.]]).view(), store.get_device()).unwrap();
        let state = array2_to_tensor(&arr2(&[[2., -4.], [1., 0.]]).view(), store.get_device()).unwrap();
        let new_state = gru.forward(&inputs, &state).unwrap();
        assert_eq!(tensor_to_array2::<f64>(&new_state).unwrap(), arr2(&[[1., -2.], [0.5, 0.]]));
    }

    #[test]
    fn gru_state_stays_bounded() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f32>(51);
        let gru = GruCell::new::<f32>(&mut store, "gru", 4, 3).unwrap();
        let inputs = array2_to_tensor(&Array2::<f32>::from_elem((5, 4), 10.).view(), store.get_device()).unwrap();
        let state = array2_to_tensor(&Array2::<f32>::zeros((5, 3)).view(), store.get_device()).unwrap();
        let new_state = tensor_to_array2::<f32>(&gru.forward(&inputs, &state).unwrap()).unwrap();
        // convex combination of 0 and tanh values
        assert!(new_state.iter().all(|v| v.abs() <= 1f32));
        let bad_state = array2_to_tensor(&Array2::<f32>::zeros((4, 3)).view(), store.get_device()).unwrap();
        assert!(gru.forward(&inputs, &bad_state).is_err());
    }
} // end of mod tests
