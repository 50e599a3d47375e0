// THEORY:
// Errors are split by when they can happen. `ConfigError` is raised once, while
// the static configuration is validated, and is always fatal: a parking lot with
// a degenerate spot polygon cannot be analysed meaningfully. `PipelineError` is
// what a per-frame call can return. Everything the per-frame path can recover
// from locally (tiny colour regions, zero-height contours, empty frames) never
// becomes an error at all.

use crate::core_modules::spot::SpotId;
use thiserror::Error;

/// A problem with the static configuration, detected before any frame is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported configuration version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("frame size must be non-zero, got {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },

    #[error("parking spot {id} has a degenerate boundary (area {area})")]
    DegenerateSpot { id: SpotId, area: f64 },

    #[error("parking spot {0} extends past the pixel coordinate range")]
    SpotOutOfRange(SpotId),

    #[error("parking spot id {0} is used more than once")]
    DuplicateSpotId(SpotId),

    #[error("area of interest polygon is degenerate (area {0})")]
    DegenerateAreaOfInterest(f64),

    #[error("{name} must be an odd, positive kernel size (got {value})")]
    InvalidKernel { name: &'static str, value: u32 },

    #[error("invalid range for {name}: {min} .. {max}")]
    InvalidRange {
        name: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{name} out of bounds: {value}")]
    OutOfBounds { name: &'static str, value: f64 },

    #[error("colour table `{0}` is empty")]
    EmptyColorTable(&'static str),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A failure while processing a frame.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("spot worker failed: {0}")]
    Worker(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
