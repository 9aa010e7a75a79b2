//! Per-step encoder state.
//!
//! Each encoder keeps the code of the current and previous step, the per-unit
//! distances behind the current code, and copies of the visible inputs used
//! by the last activation so that learning sees exactly what activation saw.

use serde::{Deserialize, Serialize};

use crate::core::field::{Field, FieldSize, SparseCode};

/// Transient state of one sparse feature layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    /// Current code: activation strength per unit, 0 when inactive.
    pub hidden: Field,

    /// Code of the previous step.
    pub hidden_prev: Field,

    /// Per-unit distance of the current step; infinite for silent columns.
    pub distances: Field,

    /// Visible inputs of the last activation, recurrent input last.
    pub visible: Vec<Field>,
}

impl LayerState {
    /// Zeroed state for a `size` grid of `column_size` units reading
    /// visible layers of the given sizes and depths.
    pub fn new(size: FieldSize, column_size: usize, visible: &[(FieldSize, usize)]) -> Self {
        let mut distances = Field::with_depth(size, column_size);
        distances.fill(f32::INFINITY);
        Self {
            hidden: Field::with_depth(size, column_size),
            hidden_prev: Field::with_depth(size, column_size),
            distances,
            visible: visible
                .iter()
                .map(|&(vs, depth)| Field::with_depth(vs, depth))
                .collect(),
        }
    }

    /// Move the current code into the previous-code slot.
    ///
    /// The stale buffer left in `hidden` is fully overwritten by the next
    /// activation.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.hidden, &mut self.hidden_prev);
    }

    /// Forget all transient activity.
    pub fn clear(&mut self) {
        self.hidden.fill(0.0);
        self.hidden_prev.fill(0.0);
        self.distances.fill(f32::INFINITY);
        for v in &mut self.visible {
            v.fill(0.0);
        }
    }

    pub fn code(&self) -> SparseCode {
        SparseCode::from_field(&self.hidden)
    }

    /// Check if any code or input has diverged (NaN or Inf).
    pub fn is_healthy(&self) -> bool {
        self.hidden.is_finite()
            && self.hidden_prev.is_finite()
            && self.visible.iter().all(Field::is_finite)
    }

    /// Same buffer shapes as `other`.
    pub fn same_shape(&self, other: &LayerState) -> bool {
        self.hidden.same_shape(&other.hidden)
            && self.hidden_prev.same_shape(&other.hidden_prev)
            && self.distances.same_shape(&other.distances)
            && self.visible.len() == other.visible.len()
            && self
                .visible
                .iter()
                .zip(&other.visible)
                .all(|(a, b)| a.same_shape(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> LayerState {
        LayerState::new(FieldSize::new(3, 2), 4, &[(FieldSize::new(6, 4), 1)])
    }

    #[test]
    fn test_new_shapes() {
        let s = state();
        assert_eq!(s.hidden.size(), FieldSize::new(3, 2));
        assert_eq!(s.hidden.depth(), 4);
        assert_eq!(s.visible.len(), 1);
        assert_eq!(s.visible[0].size(), FieldSize::new(6, 4));
        assert!(s.distances.array().iter().all(|d| d.is_infinite()));
        assert!(s.is_healthy());
    }

    #[test]
    fn test_rotate_keeps_previous_code() {
        let mut s = state();
        s.hidden.set_unit(1, 1, 2, 1.0);
        s.rotate();
        assert_eq!(s.hidden_prev.get_unit(1, 1, 2), 1.0);
        assert_eq!(s.hidden.get_unit(1, 1, 2), 0.0);
    }

    #[test]
    fn test_clear() {
        let mut s = state();
        s.hidden.set_unit(0, 0, 0, 1.0);
        s.hidden_prev.set_unit(0, 0, 1, 0.5);
        s.visible[0].set(3, 3, 9.0);
        s.clear();
        assert_eq!(s.hidden.count_nonzero(), 0);
        assert_eq!(s.hidden_prev.count_nonzero(), 0);
        assert_eq!(s.visible[0].count_nonzero(), 0);
        assert_eq!(s.code().total_active(), 0);
    }

    #[test]
    fn test_same_shape() {
        let a = state();
        let b = LayerState::new(FieldSize::new(3, 2), 4, &[(FieldSize::new(6, 4), 1)]);
        let c = LayerState::new(FieldSize::new(3, 2), 5, &[(FieldSize::new(6, 4), 1)]);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
