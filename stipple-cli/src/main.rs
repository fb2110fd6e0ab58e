//! Weighted Voronoi stippling CLI
//!
//! Relaxes a stipple set over the darkness of an input image and writes the
//! result as a raster image, and optionally as SVG and a YAML point list.
//!
//! ## YAML settings file
//!
//! Every key is optional; command-line flags win over the file.
//!
//! ```yaml
//! count: 10
//! point_size: 2.0
//! multiplier: 1.0
//! max_iterations: 100
//! max_points: 20000
//! background: "#ffffff"
//! color: "#000000"
//! seed: 0
//! backend: grid
//! scale: 2.0
//! ```
//!
//! Run with: `stipple -i img.png -o out.png --config stipple.yaml`
//!
//! ## Graceful interruption
//!
//! Press Ctrl+C to stop iterating; the last point set is still written.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use serde::{Deserialize, Serialize};
use svg::node::element::{Circle, Rectangle};
use svg::Document;

use stipple_core::{
    BackendKind, DensityField, DiscRenderer, EngineState, Params, PartitionBackend, Point,
    Renderer, Rgb, StippleEngine,
};

/// YAML settings file format
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StippleConfig {
    count: Option<usize>,
    jitter: Option<f64>,
    h_step: Option<f64>,
    h_const: Option<f64>,
    point_size: Option<f32>,
    max_iterations: Option<usize>,
    max_points: Option<usize>,
    multiplier: Option<f64>,
    background: Option<String>,
    color: Option<String>,
    seed: Option<u64>,
    backend: Option<String>,
    scale: Option<f64>,
}

impl StippleConfig {
    /// Override every key that is set on the command line
    fn overlay(self, args: &Args) -> Self {
        Self {
            count: args.count.or(self.count),
            jitter: args.jitter.or(self.jitter),
            h_step: args.h_step.or(self.h_step),
            h_const: args.h_const.or(self.h_const),
            point_size: args.point_size.or(self.point_size),
            max_iterations: args.max_iterations.or(self.max_iterations),
            max_points: args.max_points.or(self.max_points),
            multiplier: args.multiplier.or(self.multiplier),
            background: args.background.clone().or(self.background),
            color: args.color.clone().or(self.color),
            seed: args.seed.or(self.seed),
            backend: args.backend.clone().or(self.backend),
            scale: args.scale.or(self.scale),
        }
    }

    fn params(&self) -> anyhow::Result<Params> {
        let defaults = Params::default();
        let params = Params {
            count: self.count.unwrap_or(defaults.count),
            jitter: self.jitter.unwrap_or(defaults.jitter),
            h_step: self.h_step.unwrap_or(defaults.h_step),
            h_const: self.h_const.unwrap_or(defaults.h_const),
            point_size: self.point_size.unwrap_or(defaults.point_size),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            max_points: self.max_points.unwrap_or(defaults.max_points),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            background: self
                .background
                .as_deref()
                .map(parse_hex_color)
                .transpose()
                .context("invalid background color")?
                .unwrap_or(defaults.background),
            point_color: self
                .color
                .as_deref()
                .map(parse_hex_color)
                .transpose()
                .context("invalid point color")?
                .unwrap_or(defaults.point_color),
        };
        params.validate()?;
        Ok(params)
    }

    fn backend_kind(&self) -> anyhow::Result<BackendKind> {
        match self.backend.as_deref() {
            None => Ok(BackendKind::Grid),
            Some(name) => name.parse().map_err(|e: String| anyhow::anyhow!(e)),
        }
    }

    fn scale(&self) -> anyhow::Result<f64> {
        let scale = self.scale.unwrap_or(1.0);
        if !(scale.is_finite() && scale > 0.0) {
            anyhow::bail!("scale must be positive, got {}", scale);
        }
        Ok(scale)
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<StippleConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {:?}", path))
}

/// Parse `#rrggbb` (the `#` is optional)
fn parse_hex_color(s: &str) -> anyhow::Result<Rgb> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        anyhow::bail!("expected #rrggbb, got '{}'", s);
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .with_context(|| format!("invalid hex digits in '{}'", s))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

fn hex_color(color: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

#[derive(Parser, Debug)]
#[command(name = "stipple")]
#[command(about = "Render weighted Voronoi stipplings", long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Input image path
    #[arg(short, long)]
    input: PathBuf,

    /// Output raster path (format from extension)
    #[arg(short, long)]
    output: PathBuf,

    /// Also write the stipples as SVG
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Also write the final point set as YAML
    #[arg(long)]
    points: Option<PathBuf>,

    /// YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial number of random seeds
    #[arg(long)]
    count: Option<usize>,

    /// Split jitter (normalized units)
    #[arg(long)]
    jitter: Option<f64>,

    /// Hysteresis growth per iteration
    #[arg(long)]
    h_step: Option<f64>,

    /// Initial hysteresis
    #[arg(long)]
    h_const: Option<f64>,

    /// Stipple radius in pixels
    #[arg(long)]
    point_size: Option<f32>,

    #[arg(long)]
    max_iterations: Option<usize>,

    #[arg(long)]
    max_points: Option<usize>,

    /// Scale on the ink mass of one stipple
    #[arg(long)]
    multiplier: Option<f64>,

    /// Background color (#rrggbb)
    #[arg(long)]
    background: Option<String>,

    /// Stipple color (#rrggbb)
    #[arg(long)]
    color: Option<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Partition backend: brute | grid | gpu
    #[arg(long)]
    backend: Option<String>,

    /// Output canvas scale relative to the input image
    #[arg(long)]
    scale: Option<f64>,
}

/// One stipple in the YAML point dump
#[derive(Debug, Serialize)]
struct StippleRecord {
    x: f64,
    y: f64,
    size: f32,
    color: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Set up SIGINT handler
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;
    }

    let file_config = args.config.as_ref().map(load_config).transpose()?;
    let config = file_config.unwrap_or_default().overlay(&args);
    let params = config.params()?;
    let seed = config.seed.unwrap_or(0);
    let scale = config.scale()?;

    println!("Loading image: {:?}", args.input);
    let density = DensityField::open(&args.input)
        .with_context(|| format!("failed to load image: {:?}", args.input))?;
    let (width, height) = density.dimensions();
    println!("Image size: {}x{}", width, height);

    let backend = create_backend(config.backend_kind()?)?;
    println!("Using {} backend (seed: {})", backend.name(), seed);

    let mut engine = StippleEngine::with_seed(density, params, backend, seed)?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );

    let start = Instant::now();
    let solution = engine.solve_with(|report| {
        progress.set_message(format!(
            "iteration {}: {} stipples, {} changes",
            report.iteration, report.points, report.changes
        ));
        progress.tick();
        if interrupted.load(Ordering::Relaxed) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    match solution.state {
        EngineState::Converged => progress.finish_with_message("Converged"),
        EngineState::Failed(reason) => {
            progress.abandon_with_message(format!("Stopped: {:?}", reason))
        }
        _ => progress.abandon_with_message("Interrupted"),
    }
    println!(
        "{} stipples after {} iterations ({:.1}s)",
        solution.points.len(),
        solution.iterations,
        start.elapsed().as_secs_f64()
    );

    let canvas_w = ((width as f64 * scale).round() as u32).max(1);
    let canvas_h = ((height as f64 * scale).round() as u32).max(1);
    let scaled = scale_points(&solution.points, scale);
    let image = DiscRenderer::new().render(&scaled, canvas_w, canvas_h, engine.params().background);
    image
        .save(&args.output)
        .with_context(|| format!("failed to write output: {:?}", args.output))?;
    println!("Output saved to: {:?}", args.output);

    if let Some(path) = &args.svg {
        write_svg(path, &solution.points, width, height, engine.params().background)?;
        println!("SVG saved to: {:?}", path);
    }

    if let Some(path) = &args.points {
        write_points(path, &solution.points)?;
        println!("Points saved to: {:?}", path);
    }

    Ok(())
}

/// Create the requested backend; an unavailable GPU degrades to the grid backend
fn create_backend(kind: BackendKind) -> anyhow::Result<Box<dyn PartitionBackend>> {
    match kind.create() {
        Ok(backend) => Ok(backend),
        Err(e) if kind == BackendKind::Raster => {
            warn!("GPU backend unavailable: {}. Falling back to grid.", e);
            Ok(BackendKind::Grid.create()?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Stipple radii are in input pixels; grow them with the output canvas
fn scale_points(points: &[Point], scale: f64) -> Vec<Point> {
    points
        .iter()
        .map(|p| Point::new(p.pos, p.size * scale as f32, p.color))
        .collect()
}

fn write_svg(
    path: &Path,
    points: &[Point],
    width: u32,
    height: u32,
    background: Rgb,
) -> anyhow::Result<()> {
    let mut document = Document::new()
        .set("viewBox", (0, 0, width, height))
        .set("width", width)
        .set("height", height)
        .add(
            Rectangle::new()
                .set("width", width)
                .set("height", height)
                .set("fill", hex_color(background)),
        );

    for point in points {
        document = document.add(
            Circle::new()
                .set("cx", point.pos.x * width as f64)
                .set("cy", point.pos.y * height as f64)
                .set("r", point.size)
                .set("fill", hex_color(point.color)),
        );
    }

    svg::save(path, &document).with_context(|| format!("failed to write SVG: {:?}", path))
}

fn write_points(path: &Path, points: &[Point]) -> anyhow::Result<()> {
    let records: Vec<StippleRecord> = points
        .iter()
        .map(|p| StippleRecord {
            x: p.pos.x,
            y: p.pos.y,
            size: p.size,
            color: hex_color(p.color),
        })
        .collect();
    let yaml = serde_yaml::to_string(&records).context("failed to serialize points")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write points: {:?}", path))
}
