//! Error taxonomy for building, stepping and persisting a hierarchy.
//!
//! Configuration errors are raised while building or when a step receives
//! inputs of the wrong shape. Device errors come from acquiring the compute
//! backend. Persistence errors come from snapshot encoding and decoding; a
//! failed load never modifies the live hierarchy.

use thiserror::Error;

use crate::core::field::{Field, FieldSize};

/// Errors in the configuration surface or in per-step input validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("shape mismatch for {what}: expected {expected}x{expected_depth}, got {found}x{found_depth}")]
    ShapeMismatch {
        what: String,
        expected: FieldSize,
        expected_depth: usize,
        found: FieldSize,
        found_depth: usize,
    },

    #[error("expected {expected} input fields, got {found}")]
    InputCount { expected: usize, found: usize },

    #[error("unknown option `{key}` on {layer}")]
    UnknownOption { layer: String, key: String },

    #[error("invalid value {value} for option `{key}` on {layer}: {reason}")]
    InvalidOption {
        layer: String,
        key: String,
        value: f32,
        reason: String,
    },

    #[error("topology needs at least one input layer and one higher layer")]
    EmptyTopology,

    #[error("step order violated: {0}")]
    StepOrder(String),
}

impl ConfigError {
    /// `field` does not have the `size` and `depth` declared for `what`.
    pub(crate) fn shape(what: impl Into<String>, size: FieldSize, depth: usize, field: &Field) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: size,
            expected_depth: depth,
            found: field.size(),
            found_depth: field.depth(),
        }
    }
}

/// Errors acquiring or programming the compute backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("kernel program rejected: {0}")]
    KernelCompilationError(String),
}

/// Errors saving or restoring hierarchy state.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("snapshot topology does not match the live hierarchy")]
    TopologyMismatch,

    #[error("corrupt snapshot: {0}")]
    CorruptState(String),

    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("snapshot encoding failed: {0}")]
    Encode(String),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for every fallible hierarchy operation.
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<std::io::Error> for HierarchyError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(PersistenceError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, HierarchyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = ConfigError::shape("input 0", FieldSize::new(4, 4), 1, &Field::new(FieldSize::new(3, 4)));
        assert_eq!(
            err.to_string(),
            "shape mismatch for input 0: expected 4x4x1, got 3x4x1"
        );
    }

    #[test]
    fn test_depth_only_mismatch_names_both_depths() {
        let field = Field::with_depth(FieldSize::new(4, 4), 2);
        let err = ConfigError::shape("encoder input 0", FieldSize::new(4, 4), 3, &field);
        assert_eq!(
            err,
            ConfigError::ShapeMismatch {
                what: "encoder input 0".to_string(),
                expected: FieldSize::new(4, 4),
                expected_depth: 3,
                found: FieldSize::new(4, 4),
                found_depth: 2,
            }
        );
        assert!(err.to_string().ends_with("expected 4x4x3, got 4x4x2"));
    }

    #[test]
    fn test_wrapping_preserves_variant() {
        let err: HierarchyError = DeviceError::DeviceUnavailable("no threads".into()).into();
        assert!(matches!(
            err,
            HierarchyError::Device(DeviceError::DeviceUnavailable(_))
        ));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HierarchyError = io.into();
        assert!(matches!(
            err,
            HierarchyError::Persistence(PersistenceError::Io(_))
        ));
    }
}
