//! Input and output : csv edge lists, bson dumps of models and graph vectors.

pub mod bson;
pub mod csv;
