//! Batched graph container and segment operations.

pub mod graphdata;
pub mod segment;

pub use graphdata::{BatchTopology, GraphData};
pub use segment::{AggregationType, Segments};
