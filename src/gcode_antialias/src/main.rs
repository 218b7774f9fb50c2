use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use gcode_antialias_lib as ga;
use gcode_antialias_lib::{ContourConfig, Mm, RunOptions};
use tracing::{info, warn};

// KdTree construction recurses deeply on big meshes.
const STACK_SIZE: usize = 16 * 1024 * 1024;

/// Contours top surfaces and walls of sliced G-code to the model meshes, so shallow slopes print
/// without stair steps.
#[derive(Parser, Debug)]
#[command(name = "gcode_antialias", version)]
struct Cli {
    /// Sliced G-code from OrcaSlicer, PrusaSlicer or BambuStudio.
    input: PathBuf,

    /// Directory holding the STL of every object in the file. Defaults to the input's directory.
    #[arg(short, long = "models")]
    model_dir: Option<PathBuf>,

    /// Where to write the result. Defaults to overwriting the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Model name as placed on the plate.
    #[arg(long, requires = "plate_position")]
    plate_model: Option<String>,

    /// Plate position of the model as X,Y.
    #[arg(long, requires = "plate_model", value_parser = parse_xy)]
    plate_position: Option<(Mm, Mm)>,

    /// Max contoured segment length in mm.
    #[arg(long, conflicts_with = "legacy_resolution", value_parser = parse_resolution)]
    resolution: Option<Mm>,

    /// Use the coarse segment length of older releases.
    #[arg(long)]
    legacy_resolution: bool,

    #[arg(long)]
    extra_z_factor: Option<Mm>,

    #[arg(long)]
    steep_normal_z: Option<Mm>,

    #[arg(long)]
    down_epsilon: Option<Mm>,

    #[arg(long)]
    coverage_width_factor: Option<Mm>,

    #[arg(long)]
    min_offset: Option<Mm>,

    /// Leave everything with Y below this uncontoured, for side by side test prints.
    #[arg(long)]
    demo_split_y: Option<Mm>,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn contour_config(&self) -> ContourConfig {
        let defaults = ContourConfig::default();
        let resolution = if self.legacy_resolution {
            ga::LEGACY_RESOLUTION
        } else {
            self.resolution.unwrap_or(defaults.resolution)
        };
        ContourConfig {
            resolution,
            extra_z_factor: self.extra_z_factor.unwrap_or(defaults.extra_z_factor),
            steep_normal_z: self.steep_normal_z.unwrap_or(defaults.steep_normal_z),
            down_epsilon: self.down_epsilon.unwrap_or(defaults.down_epsilon),
            coverage_width_factor: self
                .coverage_width_factor
                .unwrap_or(defaults.coverage_width_factor),
            min_offset: self.min_offset.unwrap_or(defaults.min_offset),
            demo_split_y: self.demo_split_y.or(defaults.demo_split_y),
        }
    }
}

fn parse_xy(value: &str) -> std::result::Result<(Mm, Mm), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {value:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<Mm>()
            .map_err(|e| format!("{v:?}: {e}"))
    };
    Ok((parse(x)?, parse(y)?))
}

fn parse_resolution(value: &str) -> std::result::Result<Mm, String> {
    let resolution: Mm = value.parse().map_err(|e| format!("{value:?}: {e}"))?;
    if !(resolution >= ga::MIN_RESOLUTION && resolution.is_finite()) {
        return Err(format!(
            "must be a finite length of at least {} mm",
            ga::MIN_RESOLUTION
        ));
    }
    Ok(resolution)
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is left alone in case someone pipes G-code through it later
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let (Some(model), Some((x, y))) = (&cli.plate_model, cli.plate_position) {
        // Objects carry their own placement in EXCLUDE_OBJECT_DEFINE, so this is informational.
        warn!(
            model = %model,
            x,
            y,
            "plate placement given; using per-object centers from the gcode"
        );
    }

    let output = cli.output.clone().unwrap_or_else(|| cli.input.clone());
    let options = RunOptions {
        model_dir: cli.model_dir.clone(),
        contour: cli.contour_config(),
    };
    info!(input = %cli.input.display(), output = %output.display(), ?options, "starting");

    ga::process_files(&cli.input, &output, &options)
        .with_context(|| format!("processing {}", cli.input.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Only the thread doing the work needs the bigger stack, not every thread libs might spawn.
    // Switch threads before we have any data, to avoid needing to worry about Send or Sync.
    let primary = thread::Builder::new()
        .name("primary".to_owned())
        .stack_size(STACK_SIZE)
        .spawn(move || run(cli))
        .context("spawning primary thread")?;
    primary
        .join()
        .map_err(|_| anyhow!("primary thread panicked"))?
}
