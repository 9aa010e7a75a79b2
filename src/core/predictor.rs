//! Predictor layer — forecasts one field from one or more visible codes.
//!
//! Each output unit reads a receptive field on every visible layer:
//!
//!   y_z = Σ_v Σ_i w_{z,i} · p_i
//!
//! Bottom-level predictors (forecasting raw input fields) are linear and
//! rectified at zero. Upper predictors keep only the `k` largest positive
//! outputs of each column so their forecast looks like the sparse code it
//! stands in for.
//!
//! Learning is a normalised delta rule on the visible inputs that produced
//! the scored forecast, applied only to non-zero inputs. The normaliser is
//! the column's energy over all visible layers together:
//!
//!   w_{v,z,i} += rate_v · (t_z - y_z) · p_{v,i} / (Σ_u Σ_j p_{u,j}^2 + ε)

use ndarray::{s, Array4, ArrayViewMut1};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::config::NLMS_EPSILON;
use crate::core::field::{Field, FieldSize};
use crate::error::ConfigError;
use crate::kernels::kernel_dispatch::{ComputeProgram, ComputeSystem};
use crate::kernels::receptive::{patch_len, project_center, select_largest, Patch};

/// One visible input of a predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorVisibleDesc {
    pub size: FieldSize,
    pub depth: usize,
    pub radius: usize,
}

/// Immutable geometry of a predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorDesc {
    pub output_size: FieldSize,
    pub output_depth: usize,
    pub visible: Vec<PredictorVisibleDesc>,
    /// Keep the `k` largest positive outputs per column; `None` is linear,
    /// rectified at zero.
    pub sparsity: Option<usize>,
}

impl PredictorDesc {
    pub fn weight_shape(&self, visible: &PredictorVisibleDesc) -> (usize, usize, usize, usize) {
        (
            self.output_size.height,
            self.output_size.width,
            self.output_depth,
            patch_len(visible.radius, visible.depth),
        )
    }
}

/// Forecast buffers of a predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorState {
    /// Latest forecast.
    pub prediction: Field,

    /// Forecast of the step before; compared against the next target.
    pub prediction_prev: Field,

    /// Visible inputs behind `prediction`.
    pub visible: Vec<Field>,

    /// Visible inputs behind `prediction_prev`.
    pub visible_prev: Vec<Field>,

    /// Number of activations since creation or the last clear.
    pub activations: u64,
}

impl PredictorState {
    pub fn new(desc: &PredictorDesc) -> Self {
        let visible: Vec<Field> = desc
            .visible
            .iter()
            .map(|v| Field::with_depth(v.size, v.depth))
            .collect();
        Self {
            prediction: Field::with_depth(desc.output_size, desc.output_depth),
            prediction_prev: Field::with_depth(desc.output_size, desc.output_depth),
            visible_prev: visible.clone(),
            visible,
            activations: 0,
        }
    }

    pub fn same_shape(&self, other: &PredictorState) -> bool {
        let fields_match = |a: &[Field], b: &[Field]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
        };
        self.prediction.same_shape(&other.prediction)
            && self.prediction_prev.same_shape(&other.prediction_prev)
            && fields_match(&self.visible, &other.visible)
            && fields_match(&self.visible_prev, &other.visible_prev)
    }
}

/// Compute the forecast of column `(x, y)` into `out`.
fn forecast_column(
    desc: &PredictorDesc,
    weights: &[Array4<f32>],
    visible: &[Field],
    x: usize,
    y: usize,
    mut out: ArrayViewMut1<'_, f32>,
) {
    let patches: Vec<Patch> = desc
        .visible
        .iter()
        .zip(visible)
        .map(|(vd, field)| {
            let center = project_center(x, y, desc.output_size, vd.size);
            Patch::gather(field, center, vd.radius, false)
        })
        .collect();

    for (z, o) in out.iter_mut().enumerate() {
        *o = patches
            .iter()
            .zip(weights)
            .map(|(p, w)| p.dot(w.slice(s![y, x, z, ..])))
            .sum();
    }

    match desc.sparsity {
        Some(k) => {
            let raw = out.to_vec();
            out.fill(0.0);
            for z in select_largest(&raw, k) {
                if raw[z] > 0.0 {
                    out[z] = raw[z];
                }
            }
        }
        // Intensities are non-negative.
        None => out.mapv_inplace(|v| v.max(0.0)),
    }
}

/// Which stored forecast a target is scored against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forecast {
    /// The forecast before the latest activation.
    Previous,
    /// The latest forecast, when no activation happened since it was made.
    Latest,
}

/// A predictor with its weights and forecast state.
#[derive(Clone, Debug)]
pub struct PredictorLayer {
    desc: PredictorDesc,
    /// Learning rate per visible layer.
    rates: Vec<f32>,
    /// Per visible layer: `(height, width, output_depth, patch_len)`.
    weights: Vec<Array4<f32>>,
    state: PredictorState,
}

impl PredictorLayer {
    /// Create a predictor; `rates` holds one learning rate per visible layer.
    pub fn new(desc: PredictorDesc, rates: Vec<f32>, init_range: (f32, f32), rng: &mut StdRng) -> Self {
        let dist = Uniform::new(init_range.0, init_range.1);
        let weights = desc
            .visible
            .iter()
            .map(|v| Array4::from_shape_simple_fn(desc.weight_shape(v), || dist.sample(rng)))
            .collect();
        let state = PredictorState::new(&desc);
        Self {
            desc,
            rates,
            weights,
            state,
        }
    }

    pub fn desc(&self) -> &PredictorDesc {
        &self.desc
    }

    pub fn rates(&self) -> &[f32] {
        &self.rates
    }

    pub fn weights(&self) -> &[Array4<f32>] {
        &self.weights
    }

    pub fn state(&self) -> &PredictorState {
        &self.state
    }

    /// Latest forecast.
    pub fn prediction(&self) -> &Field {
        &self.state.prediction
    }

    fn validate_visible(&self, visible: &[&Field]) -> Result<(), ConfigError> {
        if visible.len() != self.desc.visible.len() {
            return Err(ConfigError::InputCount {
                expected: self.desc.visible.len(),
                found: visible.len(),
            });
        }
        for (i, (field, vd)) in visible.iter().zip(&self.desc.visible).enumerate() {
            if field.size() != vd.size || field.depth() != vd.depth {
                return Err(ConfigError::shape(format!("predictor input {i}"), vd.size, vd.depth, field));
            }
        }
        Ok(())
    }

    /// Forecast from `visible`; the previous forecast is kept for learning.
    pub fn activate(
        &mut self,
        cs: &ComputeSystem,
        program: &ComputeProgram,
        visible: &[&Field],
    ) -> Result<(), ConfigError> {
        self.validate_visible(visible)?;

        let state = &mut self.state;
        std::mem::swap(&mut state.prediction, &mut state.prediction_prev);
        std::mem::swap(&mut state.visible, &mut state.visible_prev);
        state.visible = visible.iter().map(|f| (*f).clone()).collect();
        state.activations += 1;

        let desc = &self.desc;
        let weights = &self.weights;
        let inputs = &state.visible;
        cs.for_each_column(program, state.prediction.array_mut(), |x, y, out| {
            forecast_column(desc, weights, inputs, x, y, out);
        });
        Ok(())
    }

    /// Learn from the actual `target` of the previous forecast.
    ///
    /// Returns the mean squared error of that forecast, or `None` when no
    /// previous forecast exists yet.
    pub fn learn(
        &mut self,
        cs: &ComputeSystem,
        program: &ComputeProgram,
        target: &Field,
    ) -> Result<Option<f32>, ConfigError> {
        self.learn_from(cs, program, target, Forecast::Previous)
    }

    /// Learn from the actual `target` of the chosen stored forecast.
    pub fn learn_from(
        &mut self,
        cs: &ComputeSystem,
        program: &ComputeProgram,
        target: &Field,
        forecast: Forecast,
    ) -> Result<Option<f32>, ConfigError> {
        if target.size() != self.desc.output_size || target.depth() != self.desc.output_depth {
            return Err(ConfigError::shape(
                "predictor target",
                self.desc.output_size,
                self.desc.output_depth,
                target,
            ));
        }
        let state = &self.state;
        let (needed, scored, inputs) = match forecast {
            Forecast::Previous => (2, &state.prediction_prev, &state.visible_prev),
            Forecast::Latest => (1, &state.prediction, &state.visible),
        };
        if state.activations < needed {
            return Ok(None);
        }

        let forecast_error = target.mean_squared_error(scored);
        let desc = &self.desc;

        // ─── Pass 1: error of the current weights on the scored inputs ───
        let mut errors = Field::with_depth(desc.output_size, desc.output_depth);
        {
            let weights = &self.weights;
            cs.for_each_column(program, errors.array_mut(), |x, y, mut err| {
                forecast_column(desc, weights, inputs, x, y, err.view_mut());
                for (z, e) in err.iter_mut().enumerate() {
                    *e = target.get_unit(x, y, z) - *e;
                }
            });
        }

        // ─── Pass 2: input energy of every column over all visible layers ───
        let mut energy = Field::new(desc.output_size);
        cs.for_each_column(program, energy.array_mut(), |x, y, mut out| {
            out[0] = desc
                .visible
                .iter()
                .zip(inputs)
                .map(|(vd, field)| {
                    let center = project_center(x, y, desc.output_size, vd.size);
                    Patch::gather(field, center, vd.radius, false).energy()
                })
                .sum();
        });

        // ─── Pass 3: normalised delta rule ───
        for ((w, vd), (field, &rate)) in self
            .weights
            .iter_mut()
            .zip(&desc.visible)
            .zip(inputs.iter().zip(&self.rates))
        {
            let errors = &errors;
            let energy = &energy;
            cs.for_each_column(program, w, |x, y, mut block| {
                let total = energy.get(x, y);
                if total == 0.0 {
                    return;
                }
                let center = project_center(x, y, desc.output_size, vd.size);
                let patch = Patch::gather(field, center, vd.radius, false);
                let norm = rate / (total + NLMS_EPSILON);
                for (z, &e) in errors.column(x, y).iter().enumerate() {
                    if e == 0.0 {
                        continue;
                    }
                    let mut unit = block.row_mut(z);
                    for &(i, p) in patch.entries() {
                        if p != 0.0 {
                            unit[i] += norm * e * p;
                        }
                    }
                }
            });
        }

        Ok(Some(forecast_error))
    }

    /// Forget forecasts and stored inputs, keeping weights.
    pub fn clear_memory(&mut self) {
        self.state = PredictorState::new(&self.desc);
    }

    pub(crate) fn from_parts(
        desc: PredictorDesc,
        rates: Vec<f32>,
        weights: Vec<Array4<f32>>,
        state: PredictorState,
    ) -> Self {
        Self {
            desc,
            rates,
            weights,
            state,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state.prediction.is_finite()
            && self.weights.iter().all(|w| w.iter().all(|v| v.is_finite()))
    }
}
