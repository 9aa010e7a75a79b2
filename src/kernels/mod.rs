//! Compute backend and kernel math.
//!
//! - **kernel_dispatch**: device acquisition and per-column dispatch
//!   (sequential CPU or data-parallel accelerator)
//! - **receptive**: receptive-field geometry, distance scoring and top-k
//!   selection shared by the encoder and predictor kernels

pub mod kernel_dispatch;
pub mod receptive;
