//! Core module — fields, encoders, predictors and the hierarchy that
//! steps them.

pub mod field;
pub mod hierarchy;
pub mod layer_state;
pub mod predictor;
pub mod sparse_features;
