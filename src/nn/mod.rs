//! Small dense building blocks used by the propagation engine.
//!
//! Everything here works on row major batches : a rank 2 candle tensor with one row per item (node, edge or graph).
//! Learned parameters live in a [ParamStore](store::ParamStore), so that gradients of a loss reach them and an
//! optimizer can update them.

pub mod real;

pub mod init;

pub mod store;

pub mod tensor;

pub mod linear;

pub mod gru;

pub mod layernorm;
