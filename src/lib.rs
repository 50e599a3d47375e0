// THEORY:
// This file is the main entry point for the `parking_vision` library crate.
// It defines the public API exposed to the runner binaries and to any other
// consumer: `OccupancyConfig` describes a camera setup, `OccupancyPipeline`
// (or its tokio-based twin `ParallelOccupancyPipeline`) turns frames into
// `OccupancyReport`s.
//
// The building blocks in `core_modules` stay public so a caller can reuse a
// single stage (for example the colour classifier) on its own, but the
// pipelines are the intended way in.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::OccupancyConfig;
pub use error::{ConfigError, PipelineError};
pub use parallel_pipeline::ParallelOccupancyPipeline;
pub use pipeline::{OccupancyPipeline, OccupancyReport, OccupancyStatus, SpotReport};
