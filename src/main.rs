//! Predictive hierarchy driver.
//!
//! Builds a hierarchy over one 2D gradient input, runs it for a number of
//! steps and logs the input next to the hierarchy's forecast of it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use predictive_hierarchy::architect::{
    build, HierarchyConfig, HigherLayerConfig, InputLayerConfig, LayerType,
};
use predictive_hierarchy::config::DEFAULT_SEED;
use predictive_hierarchy::core::field::{Field, FieldSize};
use predictive_hierarchy::kernels::kernel_dispatch::DeviceType;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Cpu,
    Accelerator,
    Auto,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayerTypeArg {
    Distance,
    Chunk,
}

impl From<LayerTypeArg> for LayerType {
    fn from(arg: LayerTypeArg) -> Self {
        match arg {
            LayerTypeArg::Distance => LayerType::Distance,
            LayerTypeArg::Chunk => LayerType::Chunk,
        }
    }
}

/// Predictive hierarchy CLI.
#[derive(Parser, Debug)]
#[command(
    name = "predictive-hierarchy",
    about = "Online sparse predictive hierarchy over a 2D input field",
    version
)]
struct Cli {
    /// Simulation steps; 0 always runs on the CPU device.
    #[arg(short = 'n', long, default_value_t = 100)]
    steps: usize,

    /// Compute device.
    #[arg(long, value_enum, default_value_t = DeviceArg::Auto)]
    device: DeviceArg,

    /// Weight initialisation seed.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Input field width.
    #[arg(long, default_value_t = 4)]
    width: usize,

    /// Input field height.
    #[arg(long, default_value_t = 4)]
    height: usize,

    /// Number of higher layers.
    #[arg(long, default_value_t = 2)]
    layers: usize,

    /// Side length of every higher layer's column grid.
    #[arg(long, default_value_t = 32)]
    layer_size: usize,

    /// Column competition of every higher layer.
    #[arg(long, value_enum, default_value_t = LayerTypeArg::Distance)]
    layer_type: LayerTypeArg,

    /// Tile side of chunk layers.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Codes each layer pools into one input of the layer above.
    #[arg(long, default_value_t = 1)]
    pool_steps: usize,

    /// Active units per column.
    #[arg(long, default_value_t = 2)]
    num_samples: usize,

    /// Learning rate of the input predictor.
    #[arg(long, default_value_t = 0.02)]
    input_alpha: f32,

    /// Receptive radius of the input predictor.
    #[arg(long, default_value_t = 8)]
    input_radius: usize,

    /// Snapshot file: loaded before the run if it exists, saved after it.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Run inference only.
    #[arg(long, default_value_t = false)]
    no_learn: bool,

    /// Log monitor diagnostics after the run.
    #[arg(long, default_value_t = false)]
    health: bool,
}

fn log_field(label: &str, field: &Field) {
    tracing::info!("{}:", label);
    for y in 0..field.height() {
        let row: Vec<String> = (0..field.width())
            .map(|x| format!("{:7.3}", field.get(x, y)))
            .collect();
        tracing::info!("  {}", row.join(" "));
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    tracing::info!("predictive-hierarchy v{}", env!("CARGO_PKG_VERSION"));

    let device = if cli.steps == 0 {
        DeviceType::Cpu
    } else {
        match cli.device {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Accelerator => DeviceType::Accelerator,
            DeviceArg::Auto => DeviceType::detect(),
        }
    };

    let size = FieldSize::new(cli.width, cli.height);
    let mut config = HierarchyConfig::new(device, cli.seed).with_input(
        InputLayerConfig::new(size)
            .with_param("in_p_alpha", cli.input_alpha)
            .with_param("in_p_radius", cli.input_radius as f32),
    );
    for _ in 0..cli.layers {
        let mut layer = HigherLayerConfig::new(FieldSize::new(cli.layer_size, cli.layer_size))
            .with_type(cli.layer_type.into())
            .with_param("sfc_numSamples", cli.num_samples as f32)
            .with_param("hl_poolSteps", cli.pool_steps as f32);
        if let Some(side) = cli.chunk_size {
            layer = layer.with_param("sfc_chunkSize", side as f32);
        }
        config = config.with_layer(layer);
    }

    let mut hierarchy = build(&config).context("building hierarchy")?;

    if let Some(path) = cli.snapshot.as_deref().filter(|p| p.exists()) {
        hierarchy
            .load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
    }

    let input = Field::from_fn(size, |x, y| (y * size.width + x) as f32);
    let inputs = std::slice::from_ref(&input);

    tracing::info!("Running {} step(s) on {}...", cli.steps, hierarchy.device());
    for step in 0..cli.steps {
        hierarchy
            .simulate(inputs, !cli.no_learn)
            .with_context(|| format!("simulation step {step}"))?;
    }

    log_field("Input", &input);
    log_field("Prediction", &hierarchy.get_predictions()[0]);

    if cli.health {
        let report = hierarchy.monitor().report();
        tracing::info!("Health: {:?}", report.status);
        tracing::info!("  Steps: {}", report.steps);
        tracing::info!("  Latest forecast MSE: {:?}", report.latest_error);
        tracing::info!("  Mean forecast MSE: {:.4}", report.mean_error);
        tracing::info!("  Best forecast MSE: {:.4}", report.best_error);
        tracing::info!("  Error drop over window: {:.4}", report.error_drop);
        tracing::info!("  Code density: {:.3}", report.mean_density);
    }

    if let Some(path) = &cli.snapshot {
        hierarchy
            .save(path)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
    }

    tracing::info!("Done.");
    Ok(())
}
