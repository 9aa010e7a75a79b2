//! Step monitoring for a running hierarchy.
//!
//! Tracks the one-step forecast error of the input predictions and the
//! density of the first layer's code over a rolling window of steps, and
//! grades both against optional limits.

use std::collections::VecDeque;

use crate::config::MONITOR_WINDOW;

/// Health status levels.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthStatus {
    Healthy,
    /// A metric reached its warning limit.
    Degraded(String),
    /// A metric reached its critical limit or diverged.
    Critical(String),
}

impl HealthStatus {
    fn severity(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded(_) => 1,
            Self::Critical(_) => 2,
        }
    }
}

/// Inclusive upper limits of a metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limits {
    pub warn: f32,
    pub critical: f32,
}

/// One recorded value and the step it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub step: u64,
    pub value: f32,
}

fn mean_of(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// The last `capacity` samples of a per-step metric.
#[derive(Clone, Debug)]
pub struct RollingMetric {
    name: &'static str,
    window: VecDeque<MetricSample>,
    capacity: usize,
    limits: Option<Limits>,
}

impl RollingMetric {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            window: VecDeque::with_capacity(capacity),
            capacity,
            limits: None,
        }
    }

    pub fn with_limits(mut self, warn: f32, critical: f32) -> Self {
        self.limits = Some(Limits { warn, critical });
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Samples oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.window.iter()
    }

    pub fn push(&mut self, step: u64, value: f32) {
        if self.capacity == 0 {
            return;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(MetricSample { step, value });
    }

    pub fn latest(&self) -> Option<f32> {
        self.window.back().map(|s| s.value)
    }

    fn values(&self) -> impl DoubleEndedIterator<Item = f32> + '_ {
        self.window.iter().map(|s| s.value)
    }

    pub fn mean(&self) -> f32 {
        mean_of(self.values())
    }

    /// Mean of the oldest `n` samples.
    pub fn head_mean(&self, n: usize) -> f32 {
        mean_of(self.values().take(n))
    }

    /// Mean of the newest `n` samples.
    pub fn tail_mean(&self, n: usize) -> f32 {
        mean_of(self.values().rev().take(n))
    }

    /// How far the newest `n` samples sit below the oldest `n`.
    pub fn drop_over(&self, n: usize) -> f32 {
        self.head_mean(n) - self.tail_mean(n)
    }

    /// Smallest sample; infinite when empty.
    pub fn best(&self) -> f32 {
        self.values().fold(f32::INFINITY, f32::min)
    }

    /// Grade the latest sample. A non-finite sample is critical.
    pub fn status(&self) -> HealthStatus {
        let Some(value) = self.latest() else {
            return HealthStatus::Healthy;
        };
        if !value.is_finite() {
            return HealthStatus::Critical(format!("{} diverged ({value})", self.name));
        }
        match self.limits {
            Some(l) if value >= l.critical => HealthStatus::Critical(format!(
                "{} at {value:.3}, critical limit {}",
                self.name, l.critical
            )),
            Some(l) if value >= l.warn => HealthStatus::Degraded(format!(
                "{} at {value:.3}, warning limit {}",
                self.name, l.warn
            )),
            _ => HealthStatus::Healthy,
        }
    }

    /// Whether the latest sample lies more than three standard deviations
    /// from the samples before it.
    pub fn is_spike(&self) -> bool {
        let Some(latest) = self.latest() else {
            return false;
        };
        let earlier = self.window.len() - 1;
        if earlier < 2 {
            return false;
        }
        let mean = mean_of(self.values().take(earlier));
        let var = self
            .values()
            .take(earlier)
            .map(|v| (v - mean).powi(2))
            .sum::<f32>()
            / (earlier - 1) as f32;
        let std = var.sqrt();
        std > 1e-8 && ((latest - mean) / std).abs() > 3.0
    }
}

/// Per-step metrics of a hierarchy.
#[derive(Clone, Debug)]
pub struct StepMonitor {
    prediction_error: RollingMetric,
    code_density: RollingMetric,
    steps: u64,
}

impl StepMonitor {
    pub fn new() -> Self {
        Self::with_window(MONITOR_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            prediction_error: RollingMetric::new("forecast mse", window),
            code_density: RollingMetric::new("code density", window).with_limits(0.75, 1.0),
            steps: 0,
        }
    }

    /// Mean squared error of the input forecasts.
    pub fn prediction_error(&self) -> &RollingMetric {
        &self.prediction_error
    }

    /// Fraction of active units in the first layer's code.
    pub fn code_density(&self) -> &RollingMetric {
        &self.code_density
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Record one learned step. `error` is `None` until a forecast exists.
    pub fn record_step(&mut self, step: u64, error: Option<f32>, density: f32) {
        self.steps += 1;
        if let Some(e) = error {
            self.prediction_error.push(step, e);
        }
        self.code_density.push(step, density);
    }

    /// The worse of the two metrics' statuses.
    pub fn overall_status(&self) -> HealthStatus {
        let error = self.prediction_error.status();
        let density = self.code_density.status();
        if density.severity() > error.severity() {
            density
        } else {
            error
        }
    }

    pub fn report(&self) -> MonitorReport {
        let half = self.prediction_error.len() / 2;
        MonitorReport {
            status: self.overall_status(),
            steps: self.steps,
            latest_error: self.prediction_error.latest(),
            mean_error: self.prediction_error.mean(),
            best_error: self.prediction_error.best(),
            error_drop: self.prediction_error.drop_over(half),
            mean_density: self.code_density.mean(),
            error_spike: self.prediction_error.is_spike(),
        }
    }
}

impl Default for StepMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// A monitor summary.
#[derive(Clone, Debug)]
pub struct MonitorReport {
    pub status: HealthStatus,
    pub steps: u64,
    pub latest_error: Option<f32>,
    pub mean_error: f32,
    pub best_error: f32,
    /// Mean error of the older half of the window minus the newer half.
    pub error_drop: f32,
    pub mean_density: f32,
    pub error_spike: bool,
}
