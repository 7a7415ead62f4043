//! Learned parameters.
//!
//! All parameters of a model are candle [Var]s kept in one [VarMap] under dotted names
//! (`prop.0.message.1.weight`, `aggregator.node.0.bias` ...). Values are sampled from the store's own seeded
//! rng, so a model is a function of its configuration and seed.
//!
//! Layers hold tensor clones of the variables. An optimizer step updates the variables in place and is seen by the layers.
//! Flat views go through the variables in name order.

use anyhow::anyhow;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use ndarray::{Array1, ArrayView1};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::init::Initializer;
use super::real::Real;

pub struct ParamStore {
    varmap: VarMap,
    dtype: DType,
    device: Device,
    rng: Xoshiro256PlusPlus,
} // end of ParamStore

impl ParamStore {
    /// an empty store for parameters of type F, on cpu
    pub fn new<F: Real>(seed: u64) -> Self {
        ParamStore { varmap: VarMap::new(), dtype: F::DTYPE, device: Device::Cpu, rng: Xoshiro256PlusPlus::seed_from_u64(seed) }
    }

    pub fn get_dtype(&self) -> DType {
        self.dtype
    }

    pub fn get_device(&self) -> &Device {
        &self.device
    }

    /// moves the rng to an independent stream, called between model stages
    pub fn jump(&mut self) {
        self.rng.jump();
    }

    /// creates variable name with values sampled from init. Returns a tensor sharing the variable storage.
    pub fn create<F: Real>(&mut self, name: &str, shape: &[usize], fan_in: usize, init: Initializer) -> anyhow::Result<Tensor> {
        if F::DTYPE != self.dtype {
            log::error!("ParamStore::create {}, store dtype is {:?}, got {:?}", name, self.dtype, F::DTYPE);
            return Err(anyhow!("ParamStore::create {}, store dtype is {:?}, got {:?}", name, self.dtype, F::DTYPE));
        }
        let nb_values: usize = shape.iter().product();
        let values = init.sample::<F>(fan_in, nb_values, &mut self.rng)?;
        let var = Var::from_vec(values, shape.to_vec(), &self.device)?;
        let mut data = self.varmap.data().lock().map_err(|e| anyhow!("parameter map lock poisoned : {}", e))?;
        if data.contains_key(name) {
            log::error!("ParamStore::create, parameter {} already exists", name);
            return Err(anyhow!("ParamStore::create, parameter {} already exists", name));
        }
        let tensor = var.as_tensor().clone();
        data.insert(name.to_string(), var);
        Ok(tensor)
    } // end of create

    /// a builder reading the store, used for candle_nn layers.
    /// Variables created beforehand are returned as they are (after a shape check).
    pub fn var_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device)
    }

    /// all variables, in no particular order. This is what optimizers get.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// variables sorted by name
    pub fn get_named_vars(&self) -> anyhow::Result<Vec<(String, Var)>> {
        let data = self.varmap.data().lock().map_err(|e| anyhow!("parameter map lock poisoned : {}", e))?;
        let mut named: Vec<(String, Var)> = data.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    pub fn get_var(&self, name: &str) -> anyhow::Result<Option<Var>> {
        let data = self.varmap.data().lock().map_err(|e| anyhow!("parameter map lock poisoned : {}", e))?;
        Ok(data.get(name).cloned())
    }

    pub fn get_nb_vars(&self) -> usize {
        self.all_vars().len()
    }

    /// number of scalar parameters
    pub fn nb_params(&self) -> usize {
        self.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// copy of all parameters, variables in name order, each one row major
    pub fn flat_params<F: Real>(&self) -> anyhow::Result<Array1<F>> {
        let mut values = Vec::<F>::with_capacity(self.nb_params());
        for (_, var) in self.get_named_vars()? {
            values.extend(var.as_tensor().flatten_all()?.to_vec1::<F>()?);
        }
        Ok(Array1::from(values))
    }

    /// overwrite parameters from a flat vector as returned by flat_params
    pub fn set_flat_params<F: Real>(&self, flat: &ArrayView1<F>) -> anyhow::Result<()> {
        let nb_params = self.nb_params();
        if flat.len() != nb_params {
            log::error!("set_flat_params got {} values, expected {}", flat.len(), nb_params);
            return Err(anyhow!("set_flat_params got {} values, expected {}", flat.len(), nb_params));
        }
        let mut first = 0;
        for (_, var) in self.get_named_vars()? {
            let last = first + var.elem_count();
            let values: Vec<F> = flat.iter().skip(first).take(var.elem_count()).copied().collect();
            var.set(&Tensor::from_vec(values, var.dims().to_vec(), &self.device)?)?;
            first = last;
        }
        Ok(())
    } // end of set_flat_params

    /// overwrite variable name, shape must match
    pub fn set_var_values<F: Real>(&self, name: &str, shape: &[usize], values: Vec<F>) -> anyhow::Result<()> {
        let var = match self.get_var(name)? {
            Some(var) => var,
            None => {
                log::error!("set_var_values, model has no parameter {}", name);
                return Err(anyhow!("model has no parameter {}", name));
            }
        };
        if var.dims() != shape {
            log::error!("set_var_values, parameter {} has shape {:?}, got {:?}", name, var.dims(), shape);
            return Err(anyhow!("parameter {} has shape {:?}, got {:?}", name, var.dims(), shape));
        }
        var.set(&Tensor::from_vec(values, shape.to_vec(), &self.device)?)?;
        Ok(())
    } // end of set_var_values

    /// euclidean norm of all parameters
    pub fn global_norm(&self) -> anyhow::Result<f64> {
        let mut sum_sq = 0f64;
        for var in self.all_vars() {
            sum_sq += var.as_tensor().sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
        Ok(sum_sq.sqrt())
    }
} // end of impl ParamStore

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn create_and_flat_views() {
        log_init_test();
        //
        let mut store = ParamStore::new::<f64>(31);
        let w = store.create::<f64>("b.weight", &[2, 3], 3, Initializer::TruncatedNormal).unwrap();
        let _ = store.create::<f64>("a.bias", &[2], 3, Initializer::Ones).unwrap();
        assert_eq!(w.dims(), &[2, 3]);
        assert_eq!(store.nb_params(), 8);
        assert_eq!(store.get_nb_vars(), 2);
        assert!(store.create::<f64>("a.bias", &[2], 3, Initializer::Zeros).is_err());
        assert!(store.create::<f32>("c", &[2], 3, Initializer::Zeros).is_err());
        // name order : bias first
        let flat = store.flat_params::<f64>().unwrap();
        assert_eq!(flat[0], 1.);
        assert_eq!(flat[1], 1.);
        // writing the variables is seen by the tensor given at creation
        let zeros = Array1::<f64>::zeros(8);
        store.set_flat_params(&zeros.view()).unwrap();
        assert!(w.flatten_all().unwrap().to_vec1::<f64>().unwrap().iter().all(|x| *x == 0.));
        assert_eq!(store.global_norm().unwrap(), 0.);
        assert!(store.set_flat_params(&Array1::<f64>::zeros(3).view()).is_err());
        //
        store.set_var_values("a.bias", &[2], vec![3f64, 4.]).unwrap();
        assert!((store.global_norm().unwrap() - 5.).abs() < 1.0E-12);
        assert!(store.set_var_values("a.bias", &[3], vec![3f64, 4., 0.]).is_err());
        assert!(store.set_var_values("nothing", &[2], vec![3f64, 4.]).is_err());
    } // end of create_and_flat_views

    #[test]
    fn same_seed_same_values() {
        let mut a = ParamStore::new::<f32>(5);
        let mut b = ParamStore::new::<f32>(5);
        a.create::<f32>("w", &[4, 4], 4, Initializer::TruncatedNormal).unwrap();
        b.create::<f32>("w", &[4, 4], 4, Initializer::TruncatedNormal).unwrap();
        assert_eq!(a.flat_params::<f32>().unwrap(), b.flat_params::<f32>().unwrap());
    }
} // end of mod tests
