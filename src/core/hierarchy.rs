//! Hierarchy — owns the encoders, the predictor stack and the compute device,
//! and drives one simulation step at a time.
//!
//! ## Step protocol
//!
//! 1. `activate(inputs)` encodes bottom-up, then forecasts top-down: each
//!    predictor level reads its layer's fresh code plus the fresh forecast of
//!    the level above.
//! 2. `learn(targets)` trains every predictor on the actual outcome of its
//!    forecast (top-down), then trains the encoders.
//!
//! ## Temporal pooling
//!
//! Layer `l` pools `pool_steps[l]` of its codes (element-wise maximum) into
//! one input for layer `l + 1`, so layer `l` updates once every
//! `period(l) = Π_{j<l} pool_steps[j]` steps. A layer that does not update
//! keeps its code and its forecasts.
//!
//! Predictor level `l` forecasts the input of encoder `l`. Level 0 has one
//! linear predictor per predicted input field; level `l ≥ 1` has one slot per
//! position of layer `l - 1`'s pooling window, slot `p` forecasting the code
//! layer `l - 1` will emit at position `p`.

use serde::{Deserialize, Serialize};

use crate::core::field::{Field, FieldSize, SparseCode};
use crate::core::predictor::{Forecast, PredictorDesc, PredictorLayer};
use crate::core::sparse_features::{SparseFeatures, SparseFeaturesDesc};
use crate::error::{ConfigError, Result};
use crate::kernels::kernel_dispatch::{ComputeProgram, ComputeSystem, DeviceType};
use crate::runtime::monitor::StepMonitor;

/// Immutable geometry of a hierarchy, compared on snapshot load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub inputs: Vec<FieldSize>,
    /// Whether each input has a forecast at level 0.
    pub predicted: Vec<bool>,
    pub encoders: Vec<SparseFeaturesDesc>,
    /// Codes of layer `l` pooled into one input of layer `l + 1`.
    pub pool_steps: Vec<usize>,
    /// `predictors[l]` forecasts the input of encoder `l`.
    pub predictors: Vec<Vec<PredictorDesc>>,
}

impl Topology {
    /// Steps between two updates of `layer`.
    pub fn period(&self, layer: usize) -> u64 {
        self.pool_steps[..layer].iter().map(|&p| p as u64).product()
    }

    /// Whether `layer` updates on step `step` (counted from 0).
    pub fn ticks(&self, layer: usize, step: u64) -> bool {
        (step + 1) % self.period(layer) == 0
    }

    /// Position of `layer`'s update on `step` within the window the layer
    /// above pools. Only meaningful when the layer ticks on `step`.
    pub fn position(&self, layer: usize, step: u64) -> usize {
        let updates = (step + 1) / self.period(layer);
        (updates.saturating_sub(1) % self.pool_steps[layer] as u64) as usize
    }

    /// Indices of the inputs forecast at level 0, in predictor order.
    pub fn predicted_inputs(&self) -> Vec<usize> {
        self.predicted
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect()
    }
}

/// Where the hierarchy is within the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPhase {
    /// No step in progress.
    Idle,
    /// Inputs encoded and forecasts made; learning may follow.
    Activated,
}

/// A built hierarchy.
#[derive(Debug)]
pub struct Hierarchy {
    topology: Topology,
    system: ComputeSystem,
    program: ComputeProgram,
    encoders: Vec<SparseFeatures>,
    /// `pools[l]` collects layer `l`'s codes until layer `l + 1` updates.
    pools: Vec<Field>,
    predictors: Vec<Vec<PredictorLayer>>,
    predictions: Vec<Field>,
    phase: StepPhase,
    steps: u64,
    monitor: StepMonitor,
}

impl Hierarchy {
    pub(crate) fn from_parts(
        topology: Topology,
        system: ComputeSystem,
        program: ComputeProgram,
        encoders: Vec<SparseFeatures>,
        predictors: Vec<Vec<PredictorLayer>>,
    ) -> Self {
        let predictions = topology.inputs.iter().map(|&s| Field::new(s)).collect();
        let pools = empty_pools(&topology);
        Self {
            topology,
            system,
            program,
            encoders,
            pools,
            predictors,
            predictions,
            phase: StepPhase::Idle,
            steps: 0,
            monitor: StepMonitor::new(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn device(&self) -> DeviceType {
        self.system.device()
    }

    /// Number of encoder layers.
    pub fn num_layers(&self) -> usize {
        self.encoders.len()
    }

    pub fn encoders(&self) -> &[SparseFeatures] {
        &self.encoders
    }

    pub fn predictor_levels(&self) -> &[Vec<PredictorLayer>] {
        &self.predictors
    }

    /// Pooled codes waiting to be fed upward, one per non-top layer.
    pub fn pools(&self) -> &[Field] {
        &self.pools
    }

    /// Sparse code of layer `layer`, if it exists.
    pub fn layer_code(&self, layer: usize) -> Option<SparseCode> {
        self.encoders.get(layer).map(SparseFeatures::code)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn monitor(&self) -> &StepMonitor {
        &self.monitor
    }

    /// Forecast of each input field for the next step, in input order.
    ///
    /// All zeros until the first activation, and always for inputs that are
    /// not predicted.
    pub fn get_predictions(&self) -> &[Field] {
        &self.predictions
    }

    fn validate_inputs(&self, fields: &[Field], what: &str) -> std::result::Result<(), ConfigError> {
        if fields.len() != self.topology.inputs.len() {
            return Err(ConfigError::InputCount {
                expected: self.topology.inputs.len(),
                found: fields.len(),
            });
        }
        for (i, (field, &size)) in fields.iter().zip(&self.topology.inputs).enumerate() {
            if field.size() != size || field.depth() != 1 {
                return Err(ConfigError::shape(format!("{what} {i}"), size, 1, field));
            }
        }
        Ok(())
    }

    /// Encode `inputs` bottom-up and forecast the next step top-down.
    pub fn activate(&mut self, inputs: &[Field]) -> Result<()> {
        self.validate_inputs(inputs, "input")?;
        let step = self.steps;
        let top = self.encoders.len() - 1;

        let refs: Vec<&Field> = inputs.iter().collect();
        self.encoders[0].activate(&self.system, &self.program, &refs)?;
        let mut ticked = 1;
        for l in 0..self.encoders.len() {
            if l > 0 {
                if !self.topology.ticks(l, step) {
                    break;
                }
                self.encoders[l].activate(&self.system, &self.program, &[&self.pools[l - 1]])?;
                self.pools[l - 1].fill(0.0);
                ticked = l + 1;
            }
            if l < top {
                self.pools[l].max_assign(self.encoders[l].hidden());
            }
        }

        for l in (0..ticked).rev() {
            let (lower, upper) = self.predictors.split_at_mut(l + 1);
            let mut visible = vec![self.encoders[l].hidden()];
            if let Some(level) = upper.first() {
                let next = (self.topology.position(l, step) + 1) % self.topology.pool_steps[l];
                visible.push(level[next].prediction());
            }
            for predictor in &mut lower[l] {
                predictor.activate(&self.system, &self.program, &visible)?;
            }
        }

        self.sync_predictions();
        self.phase = StepPhase::Activated;
        Ok(())
    }

    /// Train on the actual outcome of this step.
    ///
    /// `targets` are the fields the input forecasts are scored against; they
    /// usually equal the activation inputs but may differ (e.g. clean targets
    /// for corrupted inputs).
    pub fn learn(&mut self, targets: &[Field]) -> Result<()> {
        if self.phase != StepPhase::Activated {
            return Err(ConfigError::StepOrder(
                "learn requires a preceding activate in the same step".to_string(),
            )
            .into());
        }
        self.validate_inputs(targets, "target")?;
        let step = self.steps;

        let mut input_errors = Vec::with_capacity(targets.len());
        for l in (1..self.predictors.len()).rev() {
            if !self.topology.ticks(l - 1, step) {
                continue;
            }
            let forecast = if self.topology.ticks(l, step) {
                Forecast::Previous
            } else {
                Forecast::Latest
            };
            let slot = self.topology.position(l - 1, step);
            let target = self.encoders[l - 1].hidden();
            self.predictors[l][slot].learn_from(&self.system, &self.program, target, forecast)?;
        }
        let predicted = self.topology.predicted_inputs();
        for (predictor, &i) in self.predictors[0].iter_mut().zip(&predicted) {
            if let Some(e) = predictor.learn(&self.system, &self.program, &targets[i])? {
                input_errors.push(e);
            }
        }

        for (l, encoder) in self.encoders.iter_mut().enumerate() {
            if self.topology.ticks(l, step) {
                encoder.learn(&self.system, &self.program);
            }
        }

        self.end_step();
        let error = (!input_errors.is_empty())
            .then(|| input_errors.iter().sum::<f32>() / input_errors.len() as f32);
        let density = self.encoders[0].code().density();
        self.monitor.record_step(self.steps, error, density);
        tracing::debug!(step = self.steps, ?error, density, "learned step");
        Ok(())
    }

    /// Run one full step; with `learn` off only the forecasts advance.
    pub fn simulate(&mut self, inputs: &[Field], learn: bool) -> Result<()> {
        self.activate(inputs)?;
        if learn {
            self.learn(inputs)
        } else {
            self.end_step();
            Ok(())
        }
    }

    fn end_step(&mut self) {
        self.steps += 1;
        self.phase = StepPhase::Idle;
    }

    fn sync_predictions(&mut self) {
        let predicted = self.topology.predicted_inputs();
        for (predictor, i) in self.predictors[0].iter().zip(predicted) {
            self.predictions[i].clone_from(predictor.prediction());
        }
    }

    /// Forget all transient activity (codes, pools, recurrent state,
    /// forecasts) while keeping learned weights.
    pub fn clear_memory(&mut self) {
        for encoder in &mut self.encoders {
            encoder.clear_memory();
        }
        for pool in &mut self.pools {
            pool.fill(0.0);
        }
        for predictor in self.predictors.iter_mut().flatten() {
            predictor.clear_memory();
        }
        for p in &mut self.predictions {
            p.fill(0.0);
        }
        self.phase = StepPhase::Idle;
    }

    /// Check every weight, code and forecast for NaN or Inf.
    pub fn is_healthy(&self) -> bool {
        self.encoders.iter().all(SparseFeatures::is_healthy)
            && self.pools.iter().all(Field::is_finite)
            && self.predictors.iter().flatten().all(PredictorLayer::is_healthy)
    }

    /// Swap in restored components; called only after full validation.
    pub(crate) fn restore(
        &mut self,
        encoders: Vec<SparseFeatures>,
        pools: Vec<Field>,
        predictors: Vec<Vec<PredictorLayer>>,
        steps: u64,
        phase: StepPhase,
    ) {
        self.encoders = encoders;
        self.pools = pools;
        self.predictors = predictors;
        self.steps = steps;
        self.phase = phase;
        self.sync_predictions();
    }
}

/// Zeroed pools shaped like every non-top layer's code.
pub(crate) fn empty_pools(topology: &Topology) -> Vec<Field> {
    let layers = topology.encoders.len();
    topology.encoders[..layers.saturating_sub(1)]
        .iter()
        .map(|d| Field::with_depth(d.hidden_size, d.column_size))
        .collect()
}
