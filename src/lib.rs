//! # Predictive Hierarchy
//!
//! An online hierarchy of sparse, column-structured feature encoders paired
//! with a top-down predictor stack. Each step, a set of 2D input fields is
//! encoded bottom-up into progressively more abstract sparse codes; the
//! predictors then forecast every layer's next input from the layer's code
//! and the forecast of the layer above.
//!
//! ## Components
//!
//! 1. **Compute backend** — sequential CPU or data-parallel accelerator
//!    (`kernels::kernel_dispatch`)
//! 2. **Sparse feature layer** — competitive top-k encoder per column, with
//!    distance or chunk-tile column competition (`core::sparse_features`)
//! 3. **Predictor** — normalised delta-rule forecaster (`core::predictor`)
//! 4. **Hierarchy** — step protocol, temporal pooling and state ownership
//!    (`core::hierarchy`)
//! 5. **Architect** — immutable configuration and the `build` function
//! 6. **Snapshots** — checksummed, versioned persistence (`runtime::snapshot`)
//!
//! ## Usage
//!
//! ```no_run
//! use predictive_hierarchy::architect::{build, HierarchyConfig, HigherLayerConfig, InputLayerConfig};
//! use predictive_hierarchy::core::field::{Field, FieldSize};
//! use predictive_hierarchy::kernels::kernel_dispatch::DeviceType;
//!
//! let size = FieldSize::new(4, 4);
//! let config = HierarchyConfig::new(DeviceType::Cpu, 1234)
//!     .with_input(InputLayerConfig::new(size))
//!     .with_layer(HigherLayerConfig::new(FieldSize::new(8, 8)));
//! let mut hierarchy = build(&config)?;
//!
//! let input = Field::from_fn(size, |x, y| (y * 4 + x) as f32);
//! hierarchy.simulate(std::slice::from_ref(&input), true)?;
//! let forecast = &hierarchy.get_predictions()[0];
//! # Ok::<(), predictive_hierarchy::error::HierarchyError>(())
//! ```

pub mod architect;
pub mod core;
pub mod error;
pub mod kernels;
pub mod runtime;

/// Defaults and limits.
pub mod config {
    /// Seed used when none is given.
    pub const DEFAULT_SEED: u64 = 1234;

    /// Initial weight range `[lo, hi)`.
    pub const DEFAULT_INIT_WEIGHT_RANGE: (f32, f32) = (-0.01, 0.01);

    /// Units per column.
    pub const DEFAULT_COLUMN_SIZE: usize = 4;

    /// Active units per column (`k`).
    pub const DEFAULT_NUM_SAMPLES: usize = 1;

    /// Receptive-field radius.
    pub const DEFAULT_RADIUS: usize = 2;

    /// Encoder learning rate (`p_alpha`).
    pub const DEFAULT_ENCODER_ALPHA: f32 = 0.05;

    /// Rate of the predictor reading a higher layer (`p_beta`).
    pub const DEFAULT_PREDICTOR_BETA: f32 = 0.1;

    /// Chunk suppression radius; 0 disables suppression.
    pub const DEFAULT_CHUNK_RADIUS: usize = 0;

    /// Tile side of a chunk layer (`sfc_chunkSize`).
    pub const DEFAULT_CHUNK_SIZE: usize = 6;

    /// Codes pooled into one input of the layer above (`hl_poolSteps`).
    pub const DEFAULT_POOL_STEPS: usize = 1;

    /// Recurrent radius onto the layer's own previous code; 0 disables it.
    pub const DEFAULT_RECURRENT_RADIUS: usize = 0;

    /// Grid rows per accelerator task.
    pub const DEFAULT_LOCAL_ROWS: usize = 1;

    /// Largest accepted accelerator work size.
    pub const MAX_LOCAL_ROWS: usize = 1024;

    /// Regulariser of the normalised delta rule.
    pub const NLMS_EPSILON: f32 = 1e-4;

    /// Samples kept by the step monitor.
    pub const MONITOR_WINDOW: usize = 64;
}
