//! Graph embedding and graph matching models.
//!
//! - [config] : model, dataset and training configuration
//! - [encoder] : node and edge feature encoder
//! - [prop] : one propagation round (messages, aggregation, node update)
//! - [attention] : cross graph attention
//! - [aggregator] : graph level aggregation
//! - [net] : the full models

pub mod aggregator;
pub mod attention;
pub mod config;
pub mod encoder;
pub mod net;
pub mod prop;

pub use config::*;
pub use net::{ForwardOutput, GraphNet, PropagationStack};
