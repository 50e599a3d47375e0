// Example runner for the `parking_vision` library.
//
// Usage: parking_vision [--config <config.json>] <frame> [<frame> ...]
//
// Every frame is decoded with the `image` crate, scaled to the configured
// resolution when needed, and run through the pipeline. One JSON report is
// printed per frame. A frame that cannot be decoded ends the run with an error
// after the reports of the frames before it.

use anyhow::{Context, Result, bail};
use image::{RgbImage, imageops};
use parking_vision::{OccupancyConfig, OccupancyPipeline, OccupancyReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Args {
    config: Option<PathBuf>,
    frames: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut frames = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config needs a path")?;
            config = Some(PathBuf::from(path));
        } else {
            frames.push(PathBuf::from(arg));
        }
    }
    if frames.is_empty() {
        bail!("usage: parking_vision [--config <config.json>] <frame> [<frame> ...]");
    }
    Ok(Args { config, frames })
}

fn load_frame(path: &Path, width: u32, height: u32) -> Result<RgbImage> {
    let frame = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();
    if frame.dimensions() == (width, height) {
        return Ok(frame);
    }
    Ok(imageops::resize(&frame, width, height, imageops::FilterType::Triangle))
}

fn write_report(out: &mut impl Write, report: &OccupancyReport) -> Result<()> {
    serde_json::to_writer(&mut *out, report).context("failed to serialize a report")?;
    writeln!(out).context("failed to write a report")?;
    Ok(())
}

/// Runs every frame in `paths` through `pipeline`, writing one JSON line per
/// report. Returns the number of frames processed.
fn process_frames(
    pipeline: &mut OccupancyPipeline,
    paths: &[PathBuf],
    width: u32,
    height: u32,
    out: &mut impl Write,
) -> Result<u64> {
    let mut load_error = None;
    let frames = paths.iter().map_while(|path| match load_frame(path, width, height) {
        Ok(frame) => Some(frame),
        Err(err) => {
            load_error = Some(err);
            None
        }
    });

    let stop = AtomicBool::new(false);
    let mut write_error = None;
    let processed = pipeline.run_stream(frames, &stop, |report| {
        if let Err(err) = write_report(&mut *out, &report) {
            write_error = Some(err);
            stop.store(true, Ordering::Relaxed);
        }
    })?;
    if let Some(err) = write_error.or(load_error) {
        return Err(err);
    }
    Ok(processed)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => OccupancyConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => OccupancyConfig::default(),
    };
    let (width, height) = (config.frame_width, config.frame_height);
    let mut pipeline = OccupancyPipeline::new(config).context("invalid configuration")?;

    let mut out = std::io::stdout().lock();
    let processed = process_frames(&mut pipeline, &args.frames, width, height, &mut out)?;
    info!(processed, "done");
    Ok(())
}
