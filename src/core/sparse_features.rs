//! Sparse feature layer — the column-structured competitive encoder.
//!
//! The hidden grid is divided into columns of `column_size` units. Each
//! column sees a receptive field on every visible layer and activates the
//! `k` units whose weight vectors lie closest to the observed patch:
//!
//!   d_u = Σ_v mean_i (w_{u,i} - p_i)^2
//!   s_u = (1 + d_best) / (1 + d_u)       for the k winners, 0 otherwise
//!
//! Learning pulls each winner toward the patch it won on:
//!
//!   w_{u,i} += α · s_u · (p_i - w_{u,i})
//!
//! How columns compete is set by [`EncoderKind`]. A distance encoder lets
//! every column keep its winners, optionally only when it has the best match
//! in its neighbourhood. A chunk encoder tiles the grid and keeps the winners
//! of the best-matching column of each tile only.
//!
//! With a non-zero recurrent radius the layer also reads its own previous
//! code, ignoring the self connection.

use ndarray::{s, Array4};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::core::field::{Field, FieldSize, SparseCode};
use crate::core::layer_state::LayerState;
use crate::error::ConfigError;
use crate::kernels::kernel_dispatch::{ComputeProgram, ComputeSystem};
use crate::kernels::receptive::{
    patch_len, project_center, select_smallest, wins_neighborhood, wins_tile, Patch,
};

/// One visible input of an encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisibleLayerDesc {
    pub size: FieldSize,
    pub depth: usize,
    pub radius: usize,
    pub ignore_middle: bool,
}

/// Competition between the columns of an encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderKind {
    /// Every column picks its own winners. A non-zero `chunk_radius` keeps a
    /// column's winners only if it wins its Chebyshev neighbourhood.
    Distance { chunk_radius: usize },
    /// Only the best-matching column of each `chunk_size` tile is active.
    Chunk { chunk_size: FieldSize },
}

impl EncoderKind {
    /// Whether column `(x, y)` keeps its winners given every column's best
    /// score.
    fn admits(
        self,
        x: usize,
        y: usize,
        size: FieldSize,
        best: impl Fn(usize, usize) -> Option<f32>,
    ) -> bool {
        match self {
            Self::Distance { chunk_radius } => wins_neighborhood(x, y, chunk_radius, size, best),
            Self::Chunk { chunk_size } => wins_tile(x, y, chunk_size, size, best),
        }
    }
}

/// Immutable geometry of an encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseFeaturesDesc {
    pub hidden_size: FieldSize,
    pub column_size: usize,
    /// Active units per column (`k`).
    pub num_samples: usize,
    pub kind: EncoderKind,
    /// Feed-forward inputs, in order.
    pub visible: Vec<VisibleLayerDesc>,
    /// Radius onto the layer's own previous code; 0 disables it.
    pub recurrent_radius: usize,
}

impl SparseFeaturesDesc {
    /// Feed-forward inputs followed by the recurrent input, if any.
    pub fn visible_layers(&self) -> Vec<VisibleLayerDesc> {
        let mut layers = self.visible.clone();
        if self.recurrent_radius > 0 {
            layers.push(VisibleLayerDesc {
                size: self.hidden_size,
                depth: self.column_size,
                radius: self.recurrent_radius,
                ignore_middle: true,
            });
        }
        layers
    }

    /// Weight tensor shape for one visible layer.
    pub fn weight_shape(&self, visible: &VisibleLayerDesc) -> (usize, usize, usize, usize) {
        (
            self.hidden_size.height,
            self.hidden_size.width,
            self.column_size,
            patch_len(visible.radius, visible.depth),
        )
    }
}

/// A sparse feature encoder with its weights and transient state.
#[derive(Clone, Debug)]
pub struct SparseFeatures {
    desc: SparseFeaturesDesc,
    alpha: f32,
    /// Per visible layer: `(height, width, column_size, patch_len)`.
    weights: Vec<Array4<f32>>,
    state: LayerState,
}

impl SparseFeatures {
    /// Create an encoder with weights drawn uniformly from `init_range`.
    pub fn new(desc: SparseFeaturesDesc, alpha: f32, init_range: (f32, f32), rng: &mut StdRng) -> Self {
        let dist = Uniform::new(init_range.0, init_range.1);
        let layers = desc.visible_layers();
        let weights = layers
            .iter()
            .map(|v| Array4::from_shape_simple_fn(desc.weight_shape(v), || dist.sample(rng)))
            .collect();
        let shapes: Vec<(FieldSize, usize)> = layers.iter().map(|v| (v.size, v.depth)).collect();
        let state = LayerState::new(desc.hidden_size, desc.column_size, &shapes);
        Self {
            desc,
            alpha,
            weights,
            state,
        }
    }

    pub fn desc(&self) -> &SparseFeaturesDesc {
        &self.desc
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn weights(&self) -> &[Array4<f32>] {
        &self.weights
    }

    pub fn state(&self) -> &LayerState {
        &self.state
    }

    /// Current code as a dense field of strengths.
    pub fn hidden(&self) -> &Field {
        &self.state.hidden
    }

    pub fn code(&self) -> SparseCode {
        self.state.code()
    }

    /// Check the feed-forward inputs against the declared visible layers.
    pub fn validate_inputs(&self, inputs: &[&Field]) -> Result<(), ConfigError> {
        if inputs.len() != self.desc.visible.len() {
            return Err(ConfigError::InputCount {
                expected: self.desc.visible.len(),
                found: inputs.len(),
            });
        }
        for (i, (field, vd)) in inputs.iter().zip(&self.desc.visible).enumerate() {
            if field.size() != vd.size || field.depth() != vd.depth {
                return Err(ConfigError::shape(format!("encoder input {i}"), vd.size, vd.depth, field));
            }
        }
        Ok(())
    }

    /// Encode `inputs` into a new code; the previous code is kept for
    /// recurrence.
    pub fn activate(
        &mut self,
        cs: &ComputeSystem,
        program: &ComputeProgram,
        inputs: &[&Field],
    ) -> Result<(), ConfigError> {
        self.validate_inputs(inputs)?;

        self.state.rotate();
        let mut visible: Vec<Field> = inputs.iter().map(|f| (*f).clone()).collect();
        if self.desc.recurrent_radius > 0 {
            visible.push(self.state.hidden_prev.clone());
        }
        self.state.visible = visible;

        let layers = self.desc.visible_layers();
        let hidden_size = self.desc.hidden_size;
        let k = self.desc.num_samples;
        let kind = self.desc.kind;
        let weights = &self.weights;
        let state = &mut self.state;

        // ─── Pass 1: distance of every unit to its column's patches ───
        let visible = &state.visible;
        cs.for_each_column(program, state.distances.array_mut(), |x, y, mut dist| {
            let patches: Vec<Patch> = layers
                .iter()
                .zip(visible)
                .map(|(vd, field)| {
                    let center = project_center(x, y, hidden_size, vd.size);
                    Patch::gather(field, center, vd.radius, vd.ignore_middle)
                })
                .collect();

            if patches.iter().all(Patch::is_silent) {
                dist.fill(f32::INFINITY);
                return;
            }

            for (u, d) in dist.iter_mut().enumerate() {
                *d = patches
                    .iter()
                    .zip(weights)
                    .map(|(p, w)| p.mean_squared_distance(w.slice(s![y, x, u, ..])))
                    .sum();
            }
        });

        // ─── Pass 2: column competition, then top-k per surviving column ───
        let distances = &state.distances;
        let best = |cx: usize, cy: usize| {
            let d = distances
                .column(cx, cy)
                .fold(f32::INFINITY, |acc, &v| acc.min(v));
            d.is_finite().then_some(d)
        };
        cs.for_each_column(program, state.hidden.array_mut(), |x, y, mut code| {
            code.fill(0.0);
            if !kind.admits(x, y, hidden_size, best) {
                return;
            }
            let scores = distances.column(x, y).to_vec();
            let winners = select_smallest(&scores, k);
            if let Some(&first) = winners.first() {
                let d_best = scores[first];
                for &u in &winners {
                    code[u] = (1.0 + d_best) / (1.0 + scores[u]);
                }
            }
        });

        Ok(())
    }

    /// Move every active unit toward the patch it was activated by.
    pub fn learn(&mut self, cs: &ComputeSystem, program: &ComputeProgram) {
        let layers = self.desc.visible_layers();
        let hidden_size = self.desc.hidden_size;
        let alpha = self.alpha;
        let state = &self.state;

        for (w, (vd, field)) in self.weights.iter_mut().zip(layers.iter().zip(&state.visible)) {
            cs.for_each_column(program, w, |x, y, mut block| {
                let code = state.hidden.column(x, y);
                if code.iter().all(|s| *s == 0.0) {
                    return;
                }
                let center = project_center(x, y, hidden_size, vd.size);
                let patch = Patch::gather(field, center, vd.radius, vd.ignore_middle);
                for (u, &strength) in code.iter().enumerate() {
                    if strength == 0.0 {
                        continue;
                    }
                    let rate = alpha * strength;
                    let mut unit = block.row_mut(u);
                    for &(i, v) in patch.entries() {
                        unit[i] += rate * (v - unit[i]);
                    }
                }
            });
        }
    }

    /// Forget transient activity, keeping weights.
    pub fn clear_memory(&mut self) {
        self.state.clear();
    }

    /// Reassemble an encoder from restored parts; shapes are checked by the
    /// caller.
    pub(crate) fn from_parts(
        desc: SparseFeaturesDesc,
        alpha: f32,
        weights: Vec<Array4<f32>>,
        state: LayerState,
    ) -> Self {
        Self {
            desc,
            alpha,
            weights,
            state,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy() && self.weights.iter().all(|w| w.iter().all(|v| v.is_finite()))
    }
}
