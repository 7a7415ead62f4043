//! The floating point type the engine is generic over (f32 or f64).
//!
//! Parameters and node states live in candle tensors of dtype `F::DTYPE`, batches and metrics in ndarray arrays.

use std::fmt::{Debug, Display, LowerExp};
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use candle_core::WithDType;
use ndarray::{LinalgScalar, ScalarOperand};
use num_traits::{Float, FromPrimitive};

/// Gathers the bounds we need on node states and parameters.
pub trait Real:
    Float
    + FromPrimitive
    + WithDType
    + ScalarOperand
    + LinalgScalar
    + Debug
    + Display
    + LowerExp
    + Default
    + Sum
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Send
    + Sync
    + 'static
{
}

impl<F> Real for F where
    F: Float
        + FromPrimitive
        + WithDType
        + ScalarOperand
        + LinalgScalar
        + Debug
        + Display
        + LowerExp
        + Default
        + Sum
        + AddAssign
        + SubAssign
        + MulAssign
        + DivAssign
        + Send
        + Sync
        + 'static
{
}

/// converts a f64 constant. Cannot fail for f32 and f64, returns NaN otherwise.
#[inline]
pub fn real<F: Real>(x: f64) -> F {
    <F as FromPrimitive>::from_f64(x).unwrap_or_else(F::nan)
}

/// converts a count (number of nodes, of dimensions ...)
#[inline]
pub fn real_count<F: Real>(n: usize) -> F {
    <F as FromPrimitive>::from_usize(n).unwrap_or_else(F::nan)
}

/// back to f64, for logging and metrics
#[inline]
pub fn to_f64<F: Real>(x: F) -> f64 {
    num_traits::ToPrimitive::to_f64(&x).unwrap_or(f64::NAN)
}
