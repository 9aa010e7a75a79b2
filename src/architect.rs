//! Configuration surface — an immutable [`HierarchyConfig`] value consumed by
//! the pure [`build`] function.
//!
//! Each layer carries a string-keyed option map. Higher layers accept:
//!
//! | key                   | meaning                                        |
//! |-----------------------|------------------------------------------------|
//! | `p_alpha`             | encoder learning rate                          |
//! | `p_beta`              | learning rate of the predictor reading the layer |
//! | `p_radius`            | receptive radius (encoder and predictor)       |
//! | `sfc_numSamples`      | active units per column                        |
//! | `sfc_columnSize`      | units per column                               |
//! | `sfc_ff_radius`       | encoder-only radius override                   |
//! | `sfc_recurrentRadius` | radius onto the previous code (0 = off)        |
//! | `hl_poolSteps`        | codes pooled into one input of the next layer  |
//!
//! plus one key that depends on the [`LayerType`]:
//!
//! | key               | type       | meaning                              |
//! |-------------------|------------|--------------------------------------|
//! | `sfc_chunkRadius` | `Distance` | suppression radius (0 = off)         |
//! | `sfc_chunkSize`   | `Chunk`    | side of the square competition tile  |
//!
//! Input layers accept `in_p_alpha` and `in_p_radius` for the bottom
//! predictor of that input, and `in_predict` (1 or 0) to turn its forecast
//! on or off.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{
    DEFAULT_CHUNK_RADIUS, DEFAULT_CHUNK_SIZE, DEFAULT_COLUMN_SIZE, DEFAULT_ENCODER_ALPHA,
    DEFAULT_INIT_WEIGHT_RANGE, DEFAULT_LOCAL_ROWS, DEFAULT_NUM_SAMPLES, DEFAULT_POOL_STEPS,
    DEFAULT_PREDICTOR_BETA, DEFAULT_RADIUS, DEFAULT_RECURRENT_RADIUS, DEFAULT_SEED,
};
use crate::core::field::FieldSize;
use crate::core::hierarchy::{Hierarchy, Topology};
use crate::core::predictor::{PredictorDesc, PredictorLayer, PredictorVisibleDesc};
use crate::core::sparse_features::{
    EncoderKind, SparseFeatures, SparseFeaturesDesc, VisibleLayerDesc,
};
use crate::error::{ConfigError, Result};
use crate::kernels::kernel_dispatch::{ComputeProgram, ComputeSystem, DeviceType};

/// Keys accepted on input layers.
pub const INPUT_KEYS: &[&str] = &["in_p_alpha", "in_p_radius", "in_predict"];

/// Keys accepted on higher layers of every type.
pub const LAYER_KEYS: &[&str] = &[
    "p_alpha",
    "p_beta",
    "p_radius",
    "sfc_numSamples",
    "sfc_columnSize",
    "sfc_ff_radius",
    "sfc_recurrentRadius",
    "hl_poolSteps",
];

/// How the columns of a higher layer compete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LayerType {
    /// Per-column winners, optional neighbourhood suppression.
    #[default]
    Distance,
    /// One active column per square tile.
    Chunk,
}

impl LayerType {
    /// The key only this type accepts.
    pub fn extra_key(self) -> &'static str {
        match self {
            Self::Distance => "sfc_chunkRadius",
            Self::Chunk => "sfc_chunkSize",
        }
    }
}

/// Treatment of unrecognised option keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OptionPolicy {
    /// Reject with [`ConfigError::UnknownOption`].
    #[default]
    Strict,
    /// Ignore with a warning.
    Lenient,
}

/// One raw input field.
#[derive(Clone, Debug, PartialEq)]
pub struct InputLayerConfig {
    pub size: FieldSize,
    pub params: BTreeMap<String, f32>,
}

impl InputLayerConfig {
    pub fn new(size: FieldSize) -> Self {
        Self {
            size,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f32) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// One encoder layer above the inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct HigherLayerConfig {
    pub size: FieldSize,
    pub layer_type: LayerType,
    pub params: BTreeMap<String, f32>,
}

impl HigherLayerConfig {
    pub fn new(size: FieldSize) -> Self {
        Self {
            size,
            layer_type: LayerType::Distance,
            params: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, layer_type: LayerType) -> Self {
        self.layer_type = layer_type;
        self
    }

    pub fn with_param(mut self, key: &str, value: f32) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// Everything needed to build a hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct HierarchyConfig {
    pub device: DeviceType,
    pub seed: u64,
    /// Initial weight range `[lo, hi)`.
    pub init_weight_range: (f32, f32),
    pub policy: OptionPolicy,
    /// Grid rows per accelerator task.
    pub local_rows: usize,
    /// Accelerator workers; `None` uses one per hardware thread.
    pub accelerator_threads: Option<usize>,
    /// Input fields, in the order they are passed to each step.
    pub inputs: Vec<InputLayerConfig>,
    /// Higher layers, bottom to top.
    pub layers: Vec<HigherLayerConfig>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            device: DeviceType::Cpu,
            seed: DEFAULT_SEED,
            init_weight_range: DEFAULT_INIT_WEIGHT_RANGE,
            policy: OptionPolicy::Strict,
            local_rows: DEFAULT_LOCAL_ROWS,
            accelerator_threads: None,
            inputs: Vec::new(),
            layers: Vec::new(),
        }
    }
}

impl HierarchyConfig {
    pub fn new(device: DeviceType, seed: u64) -> Self {
        Self {
            device,
            seed,
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: InputLayerConfig) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_layer(mut self, layer: HigherLayerConfig) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_policy(mut self, policy: OptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_init_weight_range(mut self, lo: f32, hi: f32) -> Self {
        self.init_weight_range = (lo, hi);
        self
    }

    pub fn with_local_rows(mut self, local_rows: usize) -> Self {
        self.local_rows = local_rows;
        self
    }

    pub fn with_accelerator_threads(mut self, threads: usize) -> Self {
        self.accelerator_threads = Some(threads);
        self
    }
}

/// Resolved options of a higher layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerParams {
    pub size: FieldSize,
    pub alpha: f32,
    pub beta: f32,
    pub radius: usize,
    pub ff_radius: usize,
    pub num_samples: usize,
    pub column_size: usize,
    pub kind: EncoderKind,
    pub recurrent_radius: usize,
    pub pool_steps: usize,
}

/// Resolved options of an input layer.
#[derive(Clone, Debug, PartialEq)]
pub struct InputParams {
    pub size: FieldSize,
    pub alpha: f32,
    pub radius: usize,
    pub predict: bool,
}

/// Typed access to one layer's option map.
struct OptionReader<'a> {
    layer: String,
    params: &'a BTreeMap<String, f32>,
}

impl<'a> OptionReader<'a> {
    fn new(layer: String, params: &'a BTreeMap<String, f32>) -> Self {
        Self { layer, params }
    }

    fn invalid(&self, key: &str, value: f32, reason: &str) -> ConfigError {
        ConfigError::InvalidOption {
            layer: self.layer.clone(),
            key: key.to_string(),
            value,
            reason: reason.to_string(),
        }
    }

    fn check_keys(&self, known: &[&str], policy: OptionPolicy) -> std::result::Result<(), ConfigError> {
        for key in self.params.keys() {
            if known.contains(&key.as_str()) {
                continue;
            }
            match policy {
                OptionPolicy::Strict => {
                    return Err(ConfigError::UnknownOption {
                        layer: self.layer.clone(),
                        key: key.clone(),
                    })
                }
                OptionPolicy::Lenient => {
                    tracing::warn!("ignoring unknown option `{}` on {}", key, self.layer);
                }
            }
        }
        Ok(())
    }

    fn check_size(&self, size: FieldSize) -> std::result::Result<(), ConfigError> {
        if size.width == 0 || size.height == 0 {
            return Err(self.invalid("size", 0.0, "grid dimensions must be positive"));
        }
        Ok(())
    }

    /// A learning rate in `(0, 1]`.
    fn rate(&self, key: &str, default: f32) -> std::result::Result<f32, ConfigError> {
        let Some(&value) = self.params.get(key) else {
            return Ok(default);
        };
        if !value.is_finite() || value <= 0.0 || value > 1.0 {
            return Err(self.invalid(key, value, "must lie in (0, 1]"));
        }
        Ok(value)
    }

    /// A non-negative integral count.
    fn count(&self, key: &str, default: usize) -> std::result::Result<usize, ConfigError> {
        let Some(&value) = self.params.get(key) else {
            return Ok(default);
        };
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
            return Err(self.invalid(key, value, "must be a non-negative integer"));
        }
        Ok(value as usize)
    }

    /// A count of at least 1.
    fn positive(&self, key: &str, default: usize) -> std::result::Result<usize, ConfigError> {
        let value = self.count(key, default)?;
        if value == 0 {
            return Err(self.invalid(key, 0.0, "must be at least 1"));
        }
        Ok(value)
    }

    /// A switch given as 1 (on) or 0 (off).
    fn flag(&self, key: &str, default: bool) -> std::result::Result<bool, ConfigError> {
        match self.params.get(key) {
            None => Ok(default),
            Some(&v) if v == 1.0 => Ok(true),
            Some(&v) if v == 0.0 => Ok(false),
            Some(&v) => Err(self.invalid(key, v, "must be 0 or 1")),
        }
    }
}

/// Resolve the options of higher layer `index`.
pub fn parse_layer(
    index: usize,
    config: &HigherLayerConfig,
    policy: OptionPolicy,
) -> std::result::Result<LayerParams, ConfigError> {
    let reader = OptionReader::new(format!("layer {index}"), &config.params);
    let mut known = LAYER_KEYS.to_vec();
    known.push(config.layer_type.extra_key());
    reader.check_keys(&known, policy)?;
    reader.check_size(config.size)?;

    let column_size = reader.count("sfc_columnSize", DEFAULT_COLUMN_SIZE)?;
    if column_size == 0 {
        return Err(reader.invalid("sfc_columnSize", 0.0, "columns need at least one unit"));
    }
    let num_samples = reader.count("sfc_numSamples", DEFAULT_NUM_SAMPLES)?;
    if num_samples == 0 || num_samples > column_size {
        return Err(reader.invalid(
            "sfc_numSamples",
            num_samples as f32,
            "must lie in 1..=sfc_columnSize",
        ));
    }
    let radius = reader.count("p_radius", DEFAULT_RADIUS)?;
    let kind = match config.layer_type {
        LayerType::Distance => EncoderKind::Distance {
            chunk_radius: reader.count("sfc_chunkRadius", DEFAULT_CHUNK_RADIUS)?,
        },
        LayerType::Chunk => {
            let side = reader.positive("sfc_chunkSize", DEFAULT_CHUNK_SIZE)?;
            EncoderKind::Chunk {
                chunk_size: FieldSize::new(side, side),
            }
        }
    };

    Ok(LayerParams {
        size: config.size,
        alpha: reader.rate("p_alpha", DEFAULT_ENCODER_ALPHA)?,
        beta: reader.rate("p_beta", DEFAULT_PREDICTOR_BETA)?,
        radius,
        ff_radius: reader.count("sfc_ff_radius", radius)?,
        num_samples,
        column_size,
        kind,
        recurrent_radius: reader.count("sfc_recurrentRadius", DEFAULT_RECURRENT_RADIUS)?,
        pool_steps: reader.positive("hl_poolSteps", DEFAULT_POOL_STEPS)?,
    })
}

/// Resolve the options of input `index`; unset values follow the first
/// higher layer.
pub fn parse_input(
    index: usize,
    config: &InputLayerConfig,
    policy: OptionPolicy,
    first: &LayerParams,
) -> std::result::Result<InputParams, ConfigError> {
    let reader = OptionReader::new(format!("input {index}"), &config.params);
    reader.check_keys(INPUT_KEYS, policy)?;
    reader.check_size(config.size)?;
    Ok(InputParams {
        size: config.size,
        alpha: reader.rate("in_p_alpha", first.beta)?,
        radius: reader.count("in_p_radius", first.radius)?,
        predict: reader.flag("in_predict", true)?,
    })
}

/// Derive the immutable geometry from resolved options.
pub fn derive_topology(inputs: &[InputParams], layers: &[LayerParams]) -> Topology {
    let encoders = layers
        .iter()
        .enumerate()
        .map(|(l, p)| {
            let visible = if l == 0 {
                inputs
                    .iter()
                    .map(|i| VisibleLayerDesc {
                        size: i.size,
                        depth: 1,
                        radius: p.ff_radius,
                        ignore_middle: false,
                    })
                    .collect()
            } else {
                vec![VisibleLayerDesc {
                    size: layers[l - 1].size,
                    depth: layers[l - 1].column_size,
                    radius: p.ff_radius,
                    ignore_middle: false,
                }]
            };
            SparseFeaturesDesc {
                hidden_size: p.size,
                column_size: p.column_size,
                num_samples: p.num_samples,
                kind: p.kind,
                visible,
                recurrent_radius: p.recurrent_radius,
            }
        })
        .collect();

    let predictors = layers
        .iter()
        .enumerate()
        .map(|(l, p)| {
            let has_feedback = l + 1 < layers.len();
            let visible = |radius: usize| {
                let code = PredictorVisibleDesc {
                    size: p.size,
                    depth: p.column_size,
                    radius,
                };
                if has_feedback {
                    vec![code.clone(), code]
                } else {
                    vec![code]
                }
            };
            if l == 0 {
                inputs
                    .iter()
                    .filter(|i| i.predict)
                    .map(|i| PredictorDesc {
                        output_size: i.size,
                        output_depth: 1,
                        visible: visible(i.radius),
                        sparsity: None,
                    })
                    .collect()
            } else {
                let below = &layers[l - 1];
                let slot = PredictorDesc {
                    output_size: below.size,
                    output_depth: below.column_size,
                    visible: visible(p.radius),
                    sparsity: Some(below.num_samples),
                };
                vec![slot; below.pool_steps]
            }
        })
        .collect();

    Topology {
        inputs: inputs.iter().map(|i| i.size).collect(),
        predicted: inputs.iter().map(|i| i.predict).collect(),
        encoders,
        pool_steps: layers.iter().map(|p| p.pool_steps).collect(),
        predictors,
    }
}

/// Build a hierarchy from `config`, acquiring its compute device.
///
/// Weights are drawn from one RNG seeded with `config.seed`, in layer order,
/// so equal configs build equal hierarchies.
pub fn build(config: &HierarchyConfig) -> Result<Hierarchy> {
    if config.inputs.is_empty() || config.layers.is_empty() {
        return Err(ConfigError::EmptyTopology.into());
    }
    let (lo, hi) = config.init_weight_range;
    if !lo.is_finite() || !hi.is_finite() || lo >= hi {
        return Err(ConfigError::InvalidOption {
            layer: "hierarchy".to_string(),
            key: "init_weight_range".to_string(),
            value: lo,
            reason: format!("[{lo}, {hi}) is not a finite, non-empty range"),
        }
        .into());
    }

    let layers = config
        .layers
        .iter()
        .enumerate()
        .map(|(l, c)| parse_layer(l, c, config.policy))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let inputs = config
        .inputs
        .iter()
        .enumerate()
        .map(|(i, c)| parse_input(i, c, config.policy, &layers[0]))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let topology = derive_topology(&inputs, &layers);

    let system = match config.accelerator_threads {
        Some(threads) => ComputeSystem::with_threads(config.device, threads)?,
        None => ComputeSystem::create(config.device)?,
    };
    let program = ComputeProgram::build(&system, config.local_rows)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let encoders = topology
        .encoders
        .iter()
        .zip(&layers)
        .map(|(desc, p)| SparseFeatures::new(desc.clone(), p.alpha, config.init_weight_range, &mut rng))
        .collect();

    let predicted: Vec<&InputParams> = inputs.iter().filter(|i| i.predict).collect();
    let mut predictors = Vec::with_capacity(topology.predictors.len());
    for (l, level) in topology.predictors.iter().enumerate() {
        let built = level
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                let rate = if l == 0 { predicted[i].alpha } else { layers[l].beta };
                let rates = vec![rate; desc.visible.len()];
                PredictorLayer::new(desc.clone(), rates, config.init_weight_range, &mut rng)
            })
            .collect();
        predictors.push(built);
    }

    tracing::info!(
        "built hierarchy: {} input(s) ({} predicted), {} layer(s), device={}, seed={}",
        inputs.len(),
        predicted.len(),
        layers.len(),
        system.device(),
        config.seed,
    );
    for (l, p) in layers.iter().enumerate() {
        tracing::info!(
            "  layer {}: {} x {} units, k={}, radius={}, {:?}, pool={}",
            l,
            p.size,
            p.column_size,
            p.num_samples,
            p.ff_radius,
            p.kind,
            p.pool_steps,
        );
    }

    Ok(Hierarchy::from_parts(
        topology, system, program, encoders, predictors,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, HierarchyError};

    fn base() -> HierarchyConfig {
        HierarchyConfig::new(DeviceType::Cpu, 1)
            .with_input(InputLayerConfig::new(FieldSize::new(4, 4)))
            .with_layer(HigherLayerConfig::new(FieldSize::new(6, 6)))
            .with_layer(HigherLayerConfig::new(FieldSize::new(3, 3)))
    }

    fn config_error(config: &HierarchyConfig) -> ConfigError {
        match build(config) {
            Err(HierarchyError::Config(e)) => e,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_resolve() {
        let p = parse_layer(0, &HigherLayerConfig::new(FieldSize::new(2, 2)), OptionPolicy::Strict)
            .unwrap();
        assert_eq!(p.column_size, DEFAULT_COLUMN_SIZE);
        assert_eq!(p.num_samples, DEFAULT_NUM_SAMPLES);
        assert_eq!(p.radius, DEFAULT_RADIUS);
        assert_eq!(p.ff_radius, DEFAULT_RADIUS);
        assert_eq!(p.kind, EncoderKind::Distance { chunk_radius: 0 });
        assert_eq!(p.pool_steps, 1);

        let i = parse_input(0, &InputLayerConfig::new(FieldSize::new(4, 4)), OptionPolicy::Strict, &p)
            .unwrap();
        assert_eq!(i.alpha, p.beta);
        assert_eq!(i.radius, p.radius);
        assert!(i.predict);
    }

    #[test]
    fn test_chunk_layer_type() {
        let c = HigherLayerConfig::new(FieldSize::new(12, 12)).with_type(LayerType::Chunk);
        let p = parse_layer(0, &c, OptionPolicy::Strict).unwrap();
        assert_eq!(
            p.kind,
            EncoderKind::Chunk {
                chunk_size: FieldSize::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_SIZE)
            }
        );

        let c = c.with_param("sfc_chunkSize", 3.0);
        let p = parse_layer(0, &c, OptionPolicy::Strict).unwrap();
        assert_eq!(
            p.kind,
            EncoderKind::Chunk {
                chunk_size: FieldSize::new(3, 3)
            }
        );

        // each type accepts only its own competition key
        let wrong = c.clone().with_param("sfc_chunkRadius", 1.0);
        assert!(matches!(
            parse_layer(0, &wrong, OptionPolicy::Strict),
            Err(ConfigError::UnknownOption { .. })
        ));
        let wrong = HigherLayerConfig::new(FieldSize::new(4, 4)).with_param("sfc_chunkSize", 2.0);
        assert!(matches!(
            parse_layer(0, &wrong, OptionPolicy::Strict),
            Err(ConfigError::UnknownOption { .. })
        ));
        let zero = c.with_param("sfc_chunkSize", 0.0);
        assert!(matches!(
            parse_layer(0, &zero, OptionPolicy::Strict),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_pool_steps_size_predictor_slots() {
        let mut config = base();
        config.layers[0] = config.layers[0].clone().with_param("hl_poolSteps", 3.0);
        let h = build(&config).unwrap();
        let t = h.topology();
        assert_eq!(t.pool_steps, vec![3, 1]);
        assert_eq!(t.period(1), 3);
        assert_eq!(t.predictors[0].len(), 1);
        assert_eq!(t.predictors[1].len(), 3);
        assert!(t.predictors[1].iter().all(|d| *d == t.predictors[1][0]));

        config.layers[0] = config.layers[0].clone().with_param("hl_poolSteps", 0.0);
        assert!(matches!(config_error(&config), ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_unpredicted_input_has_no_predictor() {
        let silent = InputLayerConfig::new(FieldSize::new(2, 2)).with_param("in_predict", 0.0);
        let config = base().with_input(silent);
        let h = build(&config).unwrap();
        let t = h.topology();
        assert_eq!(t.predicted, vec![true, false]);
        assert_eq!(t.predicted_inputs(), vec![0]);
        assert_eq!(t.predictors[0].len(), 1);
        assert_eq!(t.encoders[0].visible.len(), 2);

        let half = InputLayerConfig::new(FieldSize::new(2, 2)).with_param("in_predict", 0.5);
        assert!(matches!(
            config_error(&base().with_input(half)),
            ConfigError::InvalidOption { .. }
        ));
    }

    #[test]
    fn test_ff_radius_overrides_encoder_only() {
        let c = HigherLayerConfig::new(FieldSize::new(2, 2))
            .with_param("p_radius", 3.0)
            .with_param("sfc_ff_radius", 1.0);
        let p = parse_layer(0, &c, OptionPolicy::Strict).unwrap();
        assert_eq!(p.radius, 3);
        assert_eq!(p.ff_radius, 1);
    }

    #[test]
    fn test_topology_shapes() {
        let h = build(&base()).unwrap();
        let t = h.topology();
        assert_eq!(t.inputs, vec![FieldSize::new(4, 4)]);
        assert_eq!(t.encoders.len(), 2);
        assert_eq!(t.encoders[1].visible[0].size, FieldSize::new(6, 6));
        assert_eq!(t.encoders[1].visible[0].depth, DEFAULT_COLUMN_SIZE);

        // level 0: one linear predictor per input, with feedback
        assert_eq!(t.predictors[0].len(), 1);
        assert_eq!(t.predictors[0][0].output_size, FieldSize::new(4, 4));
        assert_eq!(t.predictors[0][0].visible.len(), 2);
        assert_eq!(t.predictors[0][0].sparsity, None);

        // top level forecasts layer 0's code without feedback
        assert_eq!(t.predictors[1][0].output_size, FieldSize::new(6, 6));
        assert_eq!(t.predictors[1][0].output_depth, DEFAULT_COLUMN_SIZE);
        assert_eq!(t.predictors[1][0].visible.len(), 1);
        assert_eq!(t.predictors[1][0].sparsity, Some(DEFAULT_NUM_SAMPLES));
    }

    #[test]
    fn test_multiple_inputs() {
        let config = base().with_input(InputLayerConfig::new(FieldSize::new(2, 3)));
        let h = build(&config).unwrap();
        assert_eq!(h.get_predictions().len(), 2);
        assert_eq!(h.get_predictions()[1].size(), FieldSize::new(2, 3));
        assert_eq!(h.topology().encoders[0].visible.len(), 2);
    }

    #[test]
    fn test_unknown_option_policy() {
        let mut config = base();
        config.layers[0] = config.layers[0].clone().with_param("sfc_mystery", 1.0);
        assert!(matches!(
            config_error(&config),
            ConfigError::UnknownOption { .. }
        ));
        assert!(build(&config.with_policy(OptionPolicy::Lenient)).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("sfc_numSamples", 5.0),
            ("sfc_numSamples", 0.0),
            ("p_radius", 1.5),
            ("p_radius", -1.0),
            ("p_alpha", 0.0),
            ("p_beta", 1.5),
            ("sfc_columnSize", 0.0),
        ];
        for (key, value) in cases {
            let mut config = base();
            config.layers[0] = config.layers[0].clone().with_param(key, value);
            assert!(
                matches!(config_error(&config), ConfigError::InvalidOption { .. }),
                "{key}={value} accepted"
            );
        }
    }

    #[test]
    fn test_empty_topology() {
        let config = HierarchyConfig::new(DeviceType::Cpu, 1)
            .with_input(InputLayerConfig::new(FieldSize::new(4, 4)));
        assert_eq!(config_error(&config), ConfigError::EmptyTopology);
        assert_eq!(config_error(&HierarchyConfig::default()), ConfigError::EmptyTopology);
    }

    #[test]
    fn test_zero_sized_grid_rejected() {
        let config = HierarchyConfig::new(DeviceType::Cpu, 1)
            .with_input(InputLayerConfig::new(FieldSize::new(0, 4)))
            .with_layer(HigherLayerConfig::new(FieldSize::new(2, 2)));
        assert!(matches!(config_error(&config), ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_bad_weight_range() {
        let config = base().with_init_weight_range(0.5, 0.5);
        assert!(matches!(config_error(&config), ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_device_errors_surface() {
        let config = base().with_accelerator_threads(0);
        let config = HierarchyConfig {
            device: DeviceType::Accelerator,
            ..config
        };
        assert!(matches!(
            build(&config),
            Err(HierarchyError::Device(DeviceError::DeviceUnavailable(_)))
        ));

        let config = HierarchyConfig {
            device: DeviceType::Accelerator,
            ..base().with_local_rows(0)
        };
        assert!(matches!(
            build(&config),
            Err(HierarchyError::Device(DeviceError::KernelCompilationError(_)))
        ));
    }

    #[test]
    fn test_build_is_repeatable() {
        let config = base();
        let a = build(&config).unwrap();
        let b = build(&config).unwrap();
        assert_eq!(a.encoders()[0].weights(), b.encoders()[0].weights());
        assert_eq!(
            a.predictor_levels()[0][0].weights(),
            b.predictor_levels()[0][0].weights()
        );
    }
}
