// THEORY:
// The colour layer names the dominant colour of the pixel region that belongs to
// a vehicle occupying a spot. Two approaches sit behind one capability,
// `ColorClassifier::classify`:
//
// - `palette::DominantPaletteClassifier` (the standard one): discard glass and
//   shadow pixels, take the mean of what is left, snap it to a small palette.
// - `range_voting::RangeVotingClassifier`: let every pixel vote for the HSV
//   ranges it falls in and fall back to a black/grey/white guess.
//
// They disagree at the margins, so the active one is chosen in configuration.
// Both are pure functions of the region's pixels.

pub mod hsv;
pub mod palette;
pub mod range_voting;

use crate::config::{ColorConfig, ColorStrategy};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Regions narrower than this in either dimension are not classified.
pub const MIN_REGION_SIDE: u32 = 5;

pub const BLACK: &str = "Black";
pub const GRAY: &str = "Gray";
pub const WHITE: &str = "White";

/// The name given to a vehicle's colour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ColorLabel {
    /// A colour from the configured table (or one of the neutral fallbacks).
    Named(String),
    /// Classification ran but nothing matched.
    Unknown,
    /// The region was too small or degenerate to classify.
    NotApplicable,
}

impl ColorLabel {
    pub fn named(name: impl Into<String>) -> Self {
        ColorLabel::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ColorLabel::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorLabel::Named(name) => f.write_str(name),
            ColorLabel::Unknown => f.write_str("Unknown"),
            ColorLabel::NotApplicable => f.write_str("N/A"),
        }
    }
}

/// Names the dominant colour of a vehicle region.
pub trait ColorClassifier: Send + Sync {
    fn classify(&self, region: &RgbImage) -> ColorLabel;
}

/// True when a region is too small to say anything about its colour.
pub fn is_too_small(region: &RgbImage) -> bool {
    region.width() < MIN_REGION_SIDE || region.height() < MIN_REGION_SIDE
}

/// Builds the classifier selected by the configuration.
pub fn classifier_from_config(config: &ColorConfig) -> Arc<dyn ColorClassifier> {
    match config.strategy {
        ColorStrategy::DominantPalette => {
            Arc::new(palette::DominantPaletteClassifier::from_config(config))
        }
        ColorStrategy::RangeVoting => {
            Arc::new(range_voting::RangeVotingClassifier::from_config(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn both_strategies_refuse_slivers() {
        let sliver = RgbImage::from_pixel(4, 40, Rgb([200, 30, 30]));
        for strategy in [ColorStrategy::DominantPalette, ColorStrategy::RangeVoting] {
            let config = ColorConfig {
                strategy,
                ..ColorConfig::default()
            };
            let classifier = classifier_from_config(&config);
            assert_eq!(classifier.classify(&sliver), ColorLabel::NotApplicable);
            assert_eq!(
                classifier.classify(&RgbImage::new(0, 0)),
                ColorLabel::NotApplicable
            );
        }
    }

    #[test]
    fn labels_display_like_the_overlay_expects() {
        assert_eq!(ColorLabel::named("Blue").to_string(), "Blue");
        assert_eq!(ColorLabel::Unknown.to_string(), "Unknown");
        assert_eq!(ColorLabel::NotApplicable.to_string(), "N/A");
    }
}
