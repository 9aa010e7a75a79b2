//! Runtime module: persistence and monitoring around a running hierarchy.
//!
//! This module provides:
//! - Versioned, checksummed snapshots (in memory and on disk)
//! - Rolling step metrics and health status

pub mod monitor;
pub mod snapshot;
