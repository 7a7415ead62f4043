//! lib target
//!
//! Graph similarity learning : graph embedding and graph matching networks.
//!
//! A batch of graphs ([GraphData](graph::GraphData)) goes through an encoder, a number of propagation rounds
//! (message passing, with cross graph attention between paired graphs for the matching model) and an aggregator
//! producing one vector per graph. Graph vectors are compared with a margin (euclidean) or hamming similarity.
//!
//! Parameters live in candle variables, training differentiates the batch loss and updates parameters with AdamW.
//! The crate also provides a synthetic graph edit distance dataset, an edit distance dataset built on caller supplied
//! knowledge graphs, a training loop, evaluation metrics and bson persistence of models.

pub mod nn;

pub mod graph;

pub mod model;

pub mod loss;

pub mod validation;

pub mod dataset;

pub mod training;

pub mod io;

pub mod prelude;
