//! Dense 2D value grids and their sparse-code view.
//!
//! A [`Field`] is a `height × width × depth` grid of `f32` stored as an
//! `ndarray::Array3` indexed `[y, x, z]`. Input fields have depth 1; encoder
//! codes have one depth entry per unit of a column, holding the unit's
//! activation strength (0 for inactive units).

use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Width and height of a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSize {
    pub width: usize,
    pub height: usize,
}

impl FieldSize {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of grid positions.
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }
}

impl std::fmt::Display for FieldSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A dense grid of values with a fixed number of entries per position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    data: Array3<f32>,
}

impl Field {
    /// Zero-filled scalar field.
    pub fn new(size: FieldSize) -> Self {
        Self::with_depth(size, 1)
    }

    /// Zero-filled field with `depth` entries per position.
    pub fn with_depth(size: FieldSize, depth: usize) -> Self {
        Self {
            data: Array3::zeros((size.height, size.width, depth)),
        }
    }

    /// Scalar field filled from `f(x, y)`.
    pub fn from_fn(size: FieldSize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self {
            data: Array3::from_shape_fn((size.height, size.width, 1), |(y, x, _)| f(x, y)),
        }
    }

    /// Scalar field from row-major values (`values[y * width + x]`).
    pub fn from_vec(size: FieldSize, values: Vec<f32>) -> Result<Self, ConfigError> {
        let found = values.len();
        Array3::from_shape_vec((size.height, size.width, 1), values)
            .map(|data| Self { data })
            .map_err(|_| ConfigError::ShapeMismatch {
                what: "field values".to_string(),
                expected: size,
                expected_depth: 1,
                found: FieldSize::new(found, 1),
                found_depth: 1,
            })
    }

    pub fn size(&self) -> FieldSize {
        let (height, width, _) = self.data.dim();
        FieldSize::new(width, height)
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn depth(&self) -> usize {
        self.data.dim().2
    }

    /// First entry at `(x, y)`; the value itself for scalar fields.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[[y, x, 0]]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[[y, x, 0]] = value;
    }

    pub fn get_unit(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[[y, x, z]]
    }

    pub fn set_unit(&mut self, x: usize, y: usize, z: usize, value: f32) {
        self.data[[y, x, z]] = value;
    }

    /// All depth entries at `(x, y)`.
    pub fn column(&self, x: usize, y: usize) -> ArrayView1<'_, f32> {
        self.data.slice(ndarray::s![y, x, ..])
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    pub fn array(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn array_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Keep the element-wise maximum of `self` and `other`.
    pub fn max_assign(&mut self, other: &Field) {
        Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|a, &b| *a = a.max(b));
    }

    /// Same grid size and depth.
    pub fn same_shape(&self, other: &Field) -> bool {
        self.data.dim() == other.data.dim()
    }

    /// Mean squared difference against a field of the same shape.
    pub fn mean_squared_error(&self, other: &Field) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        sum / self.data.len() as f32
    }

    /// Check that no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Number of non-zero entries.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }
}

/// One active unit of a column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveUnit {
    pub unit: usize,
    pub strength: f32,
}

/// Sparse view of an encoder code: the active units of every column.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseCode {
    size: FieldSize,
    column_size: usize,
    columns: Vec<Vec<ActiveUnit>>,
}

impl SparseCode {
    /// Collect the non-zero entries of each column of `field`.
    pub fn from_field(field: &Field) -> Self {
        let size = field.size();
        let mut columns = Vec::with_capacity(size.area());
        for y in 0..size.height {
            for x in 0..size.width {
                let active = field
                    .column(x, y)
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s != 0.0)
                    .map(|(unit, &strength)| ActiveUnit { unit, strength })
                    .collect();
                columns.push(active);
            }
        }
        Self {
            size,
            column_size: field.depth(),
            columns,
        }
    }

    pub fn size(&self) -> FieldSize {
        self.size
    }

    pub fn column_size(&self) -> usize {
        self.column_size
    }

    /// Active units of column `(x, y)`.
    pub fn active(&self, x: usize, y: usize) -> &[ActiveUnit] {
        &self.columns[y * self.size.width + x]
    }

    /// Largest number of active units in any column.
    pub fn max_active_per_column(&self) -> usize {
        self.columns.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Fraction of all units that are active.
    pub fn density(&self) -> f32 {
        let units = self.size.area() * self.column_size;
        if units == 0 {
            0.0
        } else {
            self.total_active() as f32 / units as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_indexing() {
        let mut f = Field::new(FieldSize::new(3, 2));
        assert_eq!(f.width(), 3);
        assert_eq!(f.height(), 2);
        assert_eq!(f.depth(), 1);

        f.set(2, 1, 5.0);
        assert_eq!(f.get(2, 1), 5.0);
        assert_eq!(f.array()[[1, 2, 0]], 5.0);
    }

    #[test]
    fn test_from_vec_row_major() {
        let f = Field::from_vec(FieldSize::new(2, 2), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(f.get(1, 0), 1.0);
        assert_eq!(f.get(0, 1), 2.0);

        let err = Field::from_vec(FieldSize::new(2, 2), vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, ConfigError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_fn_matches_gradient() {
        let size = FieldSize::new(4, 4);
        let f = Field::from_fn(size, |x, y| (y * 4 + x) as f32);
        assert_eq!(f.get(3, 2), 11.0);
        assert_eq!(f.get(0, 0), 0.0);
    }

    #[test]
    fn test_mean_squared_error() {
        let size = FieldSize::new(2, 1);
        let a = Field::from_vec(size, vec![1.0, 3.0]).unwrap();
        let b = Field::from_vec(size, vec![0.0, 1.0]).unwrap();
        assert!((a.mean_squared_error(&b) - 2.5).abs() < 1e-6);
        assert_eq!(a.mean_squared_error(&a), 0.0);
    }

    #[test]
    fn test_max_assign_pools() {
        let size = FieldSize::new(3, 1);
        let mut pool = Field::new(size);
        pool.max_assign(&Field::from_vec(size, vec![0.5, 0.0, 1.0]).unwrap());
        pool.max_assign(&Field::from_vec(size, vec![0.2, 0.7, 0.0]).unwrap());
        assert_eq!(pool, Field::from_vec(size, vec![0.5, 0.7, 1.0]).unwrap());
    }

    #[test]
    fn test_sparse_code_from_field() {
        let mut f = Field::with_depth(FieldSize::new(2, 1), 4);
        f.set_unit(0, 0, 1, 1.0);
        f.set_unit(0, 0, 3, 0.5);
        f.set_unit(1, 0, 2, 1.0);

        let code = SparseCode::from_field(&f);
        assert_eq!(code.column_size(), 4);
        assert_eq!(code.max_active_per_column(), 2);
        assert_eq!(code.total_active(), 3);
        assert_eq!(
            code.active(0, 0),
            &[
                ActiveUnit { unit: 1, strength: 1.0 },
                ActiveUnit { unit: 3, strength: 0.5 }
            ]
        );
        assert!((code.density() - 3.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_finite_check() {
        let mut f = Field::new(FieldSize::new(2, 2));
        assert!(f.is_finite());
        f.set(0, 0, f32::NAN);
        assert!(!f.is_finite());
    }
}
