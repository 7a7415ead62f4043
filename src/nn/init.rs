//! Weight initializers.
//!
//! Both non trivial initializers sample a normal distribution truncated at 2 standard deviations
//! (values outside are resampled).
//! - [Initializer::TruncatedNormal] uses a standard deviation of 1/sqrt(fan_in).
//! - [Initializer::VarianceScaling] uses sqrt(scale/fan_in) corrected for the truncation, it is used
//!   with a small scale on the message networks so that summed messages do not blow up.

use anyhow::anyhow;

use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::real::{real, Real};

/// standard deviation of a unit normal truncated to [-2, 2]
const TRUNCATED_NORMAL_STDDEV: f64 = 0.87962566103423978;

#[derive(Debug, Copy, Clone)]
pub enum Initializer {
    /// truncated normal, stddev 1/sqrt(fan_in)
    TruncatedNormal,
    /// truncated normal, variance scale/fan_in
    VarianceScaling(f64),
    /// all zeros (biases, layer norm offsets)
    Zeros,
    /// all ones (layer norm scales)
    Ones,
} // end of Initializer

impl Initializer {
    /// standard deviation of the sampled values for a given fan in.
    pub fn get_stddev(&self, fan_in: usize) -> f64 {
        let fan_in = fan_in.max(1) as f64;
        match self {
            Initializer::TruncatedNormal => 1. / fan_in.sqrt(),
            Initializer::VarianceScaling(scale) => (scale / fan_in).sqrt() / TRUNCATED_NORMAL_STDDEV,
            Initializer::Zeros | Initializer::Ones => 0.,
        }
    }

    /// sample nb_values values, fan_in is used to get the scale.
    /// Values are drawn in row major order of the tensor they fill.
    pub fn sample<F: Real>(&self, fan_in: usize, nb_values: usize, rng: &mut Xoshiro256PlusPlus) -> anyhow::Result<Vec<F>> {
        match self {
            Initializer::Zeros => return Ok(vec![F::zero(); nb_values]),
            Initializer::Ones => return Ok(vec![F::one(); nb_values]),
            _ => (),
        }
        let stddev = self.get_stddev(fan_in);
        if !(stddev > 0.) {
            return Ok(vec![F::zero(); nb_values]);
        }
        let normal = Normal::new(0., stddev).map_err(|e| anyhow!("cannot build normal distribution with stddev {} : {}", stddev, e))?;
        let bound = 2. * stddev;
        let values = (0..nb_values)
            .map(|_| loop {
                let x: f64 = normal.sample(rng);
                if x.abs() <= bound {
                    break real::<F>(x);
                }
            })
            .collect::<Vec<F>>();
        Ok(values)
    } // end of sample
} // end of impl Initializer

#[cfg(test)]
mod tests {

    use super::*;
    use rand_xoshiro::rand_core::SeedableRng;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn truncation_respected() {
        log_init_test();
        //
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4664397);
        let init = Initializer::VarianceScaling(0.1);
        let w = init.sample::<f64>(16, 16 * 32, &mut rng).unwrap();
        assert_eq!(w.len(), 512);
        let bound = 2. * init.get_stddev(16);
        assert!(w.iter().all(|x| x.abs() <= bound));
        // not everything at zero
        assert!(w.iter().any(|x| x.abs() > 0.));
        //
        let z = Initializer::Zeros.sample::<f32>(3, 12, &mut rng).unwrap();
        assert!(z.iter().all(|x| *x == 0f32));
        let o = Initializer::Ones.sample::<f32>(3, 4, &mut rng).unwrap();
        assert!(o.iter().all(|x| *x == 1f32));
    } // end of truncation_respected

    #[test]
    fn stddev_scaling() {
        let std_default = Initializer::TruncatedNormal.get_stddev(64);
        assert!((std_default - 0.125f64).abs() < 1.0E-12);
        let std_scaled = Initializer::VarianceScaling(0.1).get_stddev(10);
        assert!((std_scaled - 0.1f64 / TRUNCATED_NORMAL_STDDEV).abs() < 1.0E-12);
    }

    #[test]
    fn same_seed_same_values() {
        let mut rng_a = Xoshiro256PlusPlus::seed_from_u64(17);
        let mut rng_b = Xoshiro256PlusPlus::seed_from_u64(17);
        let a = Initializer::TruncatedNormal.sample::<f32>(8, 20, &mut rng_a).unwrap();
        let b = Initializer::TruncatedNormal.sample::<f32>(8, 20, &mut rng_b).unwrap();
        assert_eq!(a, b);
    }
} // end of mod tests
