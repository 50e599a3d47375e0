// THEORY:
// `OccupancyConfig` is the single, versioned description of one camera setup:
// where the spots are, which part of the frame matters, and every tuning knob
// of the pipeline. Each section carries the defaults the system was calibrated
// with for a 960x540 view of a four-spot lot, and every section is
// `#[serde(default)]` so a JSON file only has to name what it changes.
//
// Validation happens once, up front. Anything that would later turn into a
// division by zero or a silently-never-occupied spot is rejected here.

use crate::core_modules::color::hsv::hsv::HsvRange;
use crate::core_modules::color::palette::PaletteColor;
use crate::core_modules::color::range_voting::NamedColorRange;
use crate::core_modules::spot::{ParkingSpot, Point, SpotShape, polygon_area};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

/// Everything the occupancy pipeline needs to know about a camera setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    pub version: u32,
    /// Width of every frame, and of all spot and mask coordinates.
    pub frame_width: u32,
    /// Height of every frame, and of all spot and mask coordinates.
    pub frame_height: u32,
    pub spots: Vec<ParkingSpot>,
    /// Polygon outside of which frame content is ignored.
    pub area_of_interest: Vec<Point>,
    pub preprocess: PreprocessConfig,
    pub edges: EdgeConfig,
    pub vehicle_filter: VehicleFilterConfig,
    /// Fraction of a spot's polygon area a contour must cover (strictly more than) to occupy it.
    pub min_intersection_fraction: f64,
    /// Pixels added on every side of a vehicle's bounding box before colour analysis.
    pub region_padding: u32,
    /// Consecutive occupied frames before a spot is reported as occupied.
    pub consecutive_frames_threshold: u32,
    pub color: ColorConfig,
    /// Keep the canny and closed edge maps of the last frame for debug display.
    pub keep_diagnostics: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Odd Gaussian kernel size.
    pub blur_kernel_size: u32,
    /// Gaussian sigma; 0 derives it from the kernel size.
    pub blur_sigma: f32,
    pub linear_adjust: Option<LinearAdjust>,
    pub binary_threshold: Option<BinaryThreshold>,
}

/// `saturate(|alpha * x + beta|)` applied to the grayscale frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearAdjust {
    pub alpha: f32,
    pub beta: f32,
}

/// Inverted binary threshold applied to the masked, blurred frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryThreshold {
    pub threshold: u8,
    pub max_value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Odd side length of the square closing element.
    pub close_kernel_size: u32,
    pub close_iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleFilterConfig {
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorStrategy {
    #[default]
    DominantPalette,
    RangeVoting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub strategy: ColorStrategy,

    // --- Dominant palette ---
    pub palette: Vec<PaletteColor>,
    /// Largest RGB distance at which the nearest palette colour is still accepted.
    pub palette_tolerance: f64,
    /// Pixels below both this saturation and `filter_min_value` are dropped as glass/shadow.
    pub filter_min_saturation: u8,
    pub filter_min_value: u8,
    /// Mean value below which a fully filtered region is called black.
    pub dark_value_cutoff: f64,

    // --- Range voting ---
    pub ranges: Vec<NamedColorRange>,
    /// Share of the region the winning range must cover.
    pub min_coverage: f64,
    pub neutral_max_saturation: f64,
    pub black_max_value: f64,
    pub white_min_value: f64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            frame_width: 960,
            frame_height: 540,
            spots: vec![
                ParkingSpot::new(
                    1,
                    SpotShape::polygon([(120, 528), (240, 229), (86, 182), (1, 310)]),
                ),
                ParkingSpot::new(
                    2,
                    SpotShape::polygon([(297, 136), (186, 529), (523, 528), (461, 128)]),
                ),
                ParkingSpot::new(
                    3,
                    SpotShape::polygon([(477, 124), (551, 525), (883, 514), (634, 128)]),
                ),
                ParkingSpot::new(
                    4,
                    SpotShape::polygon([(658, 184), (865, 156), (957, 217), (939, 531)]),
                ),
            ],
            area_of_interest: [(2, 537), (2, 159), (959, 116), (957, 538)]
                .into_iter()
                .map(Point::from)
                .collect(),
            preprocess: PreprocessConfig::default(),
            edges: EdgeConfig::default(),
            vehicle_filter: VehicleFilterConfig::default(),
            min_intersection_fraction: 0.05,
            region_padding: 25,
            consecutive_frames_threshold: 3,
            color: ColorConfig::default(),
            keep_diagnostics: false,
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 7,
            blur_sigma: 0.0,
            linear_adjust: None,
            binary_threshold: None,
        }
    }
}

impl PreprocessConfig {
    /// The sigma actually used for blurring.
    pub fn effective_blur_sigma(&self) -> f32 {
        if self.blur_sigma > 0.0 {
            return self.blur_sigma;
        }
        let kernel = self.blur_kernel_size.max(1) as f32;
        0.3 * ((kernel - 1.0) * 0.5 - 1.0) + 0.8
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            canny_low: 30.0,
            canny_high: 60.0,
            close_kernel_size: 13,
            close_iterations: 3,
        }
    }
}

impl Default for VehicleFilterConfig {
    fn default() -> Self {
        Self {
            min_area: 7_500.0,
            max_area: 100_000.0,
            min_aspect_ratio: 0.8,
            max_aspect_ratio: 6.0,
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            strategy: ColorStrategy::default(),
            palette: vec![
                PaletteColor::new("White", [240, 240, 240]),
                PaletteColor::new("Silver", [190, 190, 190]),
                PaletteColor::new("Gray", [120, 120, 120]),
                PaletteColor::new("Black", [30, 30, 30]),
                PaletteColor::new("Red", [200, 30, 30]),
                PaletteColor::new("Blue", [30, 60, 180]),
                PaletteColor::new("Green", [40, 140, 60]),
                PaletteColor::new("Yellow", [230, 200, 40]),
            ],
            palette_tolerance: 30.0,
            filter_min_saturation: 40,
            filter_min_value: 50,
            dark_value_cutoff: 60.0,
            ranges: vec![
                NamedColorRange::new("White", vec![HsvRange::new([0, 0, 180], [180, 20, 255])]),
                NamedColorRange::new("Black", vec![HsvRange::new([0, 0, 0], [180, 255, 40])]),
                NamedColorRange::new("Gray", vec![HsvRange::new([0, 0, 40], [180, 50, 180])]),
                NamedColorRange::new(
                    "Red",
                    vec![
                        HsvRange::new([0, 120, 70], [10, 255, 255]),
                        HsvRange::new([170, 120, 70], [180, 255, 255]),
                    ],
                ),
                NamedColorRange::new("Blue", vec![HsvRange::new([100, 150, 0], [140, 255, 255])]),
                NamedColorRange::new("Green", vec![HsvRange::new([40, 70, 50], [80, 255, 255])]),
                NamedColorRange::new(
                    "Yellow",
                    vec![HsvRange::new([20, 100, 100], [35, 255, 255])],
                ),
                NamedColorRange::new(
                    "Orange",
                    vec![HsvRange::new([10, 100, 100], [25, 255, 255])],
                ),
            ],
            min_coverage: 0.15,
            neutral_max_saturation: 50.0,
            black_max_value: 60.0,
            white_min_value: 180.0,
        }
    }
}

impl OccupancyConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::EmptyFrame {
                width: self.frame_width,
                height: self.frame_height,
            });
        }

        let roi_area = polygon_area(&self.area_of_interest);
        if roi_area <= 0.0 {
            return Err(ConfigError::DegenerateAreaOfInterest(roi_area));
        }

        let mut seen = HashSet::with_capacity(self.spots.len());
        for spot in &self.spots {
            if !seen.insert(spot.id) {
                return Err(ConfigError::DuplicateSpotId(spot.id));
            }
            if !spot.shape.is_representable() {
                return Err(ConfigError::SpotOutOfRange(spot.id));
            }
            let area = spot.shape.area();
            if area <= 0.0 {
                return Err(ConfigError::DegenerateSpot { id: spot.id, area });
            }
        }

        check_kernel("blur_kernel_size", self.preprocess.blur_kernel_size)?;
        check_kernel("close_kernel_size", self.edges.close_kernel_size)?;
        if !self.preprocess.blur_sigma.is_finite() || self.preprocess.blur_sigma < 0.0 {
            return Err(ConfigError::OutOfBounds {
                name: "blur_sigma",
                value: self.preprocess.blur_sigma as f64,
            });
        }
        if let Some(adjust) = self.preprocess.linear_adjust {
            if !adjust.alpha.is_finite() || !adjust.beta.is_finite() {
                return Err(ConfigError::OutOfBounds {
                    name: "linear_adjust",
                    value: adjust.alpha as f64,
                });
            }
        }

        check_range(
            "canny thresholds",
            self.edges.canny_low as f64,
            self.edges.canny_high as f64,
            true,
        )?;
        if self.edges.canny_low < 0.0 {
            return Err(ConfigError::OutOfBounds {
                name: "canny_low",
                value: self.edges.canny_low as f64,
            });
        }

        let filter = &self.vehicle_filter;
        check_range("vehicle area", filter.min_area, filter.max_area, false)?;
        check_range(
            "aspect ratio",
            filter.min_aspect_ratio,
            filter.max_aspect_ratio,
            false,
        )?;

        check_fraction("min_intersection_fraction", self.min_intersection_fraction)?;
        if self.consecutive_frames_threshold == 0 {
            return Err(ConfigError::OutOfBounds {
                name: "consecutive_frames_threshold",
                value: 0.0,
            });
        }

        self.color.validate()
    }
}

impl ColorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.strategy {
            ColorStrategy::DominantPalette if self.palette.is_empty() => {
                return Err(ConfigError::EmptyColorTable("palette"));
            }
            ColorStrategy::RangeVoting if self.ranges.is_empty() => {
                return Err(ConfigError::EmptyColorTable("ranges"));
            }
            _ => {}
        }
        if !(self.palette_tolerance >= 0.0) {
            return Err(ConfigError::OutOfBounds {
                name: "palette_tolerance",
                value: self.palette_tolerance,
            });
        }
        for color in &self.ranges {
            if color.ranges.is_empty() {
                return Err(ConfigError::EmptyColorTable("ranges"));
            }
            if let Some(range) = color.ranges.iter().find(|range| !range.is_ordered()) {
                return Err(ConfigError::InvalidRange {
                    name: "colour range",
                    min: range.lower[0] as f64,
                    max: range.upper[0] as f64,
                });
            }
        }
        check_fraction("min_coverage", self.min_coverage)?;
        check_range(
            "neutral value cut-offs",
            self.black_max_value,
            self.white_min_value,
            true,
        )
    }
}

fn check_kernel(name: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 || value % 2 == 0 || value / 2 > u8::MAX as u32 {
        return Err(ConfigError::InvalidKernel { name, value });
    }
    Ok(())
}

fn check_range(
    name: &'static str,
    min: f64,
    max: f64,
    allow_equal: bool,
) -> Result<(), ConfigError> {
    let ordered = if allow_equal { min <= max } else { min < max };
    if !ordered || !min.is_finite() || !max.is_finite() || min < 0.0 {
        return Err(ConfigError::InvalidRange { name, min, max });
    }
    Ok(())
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfBounds { name, value });
    }
    Ok(())
}
