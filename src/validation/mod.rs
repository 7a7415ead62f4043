//! This module implements the validation tools of trained models
//! - pair AUC on labelled pairs
//! - triplet accuracy

pub mod metrics;

pub use metrics::{auc, triplet_accuracy};
