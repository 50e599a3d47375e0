// THEORY:
// HSV range voting. Every pixel of the region votes for each named colour whose
// ranges contain it; a colour may own several ranges (red straddles hue 0, so it
// owns one range at each end of the hue scale) and a pixel inside two ranges of
// the same colour still counts once. The colour with the most votes wins when it
// covers enough of the region. Otherwise the region's mean saturation and value
// decide between the neutral colours, and anything still unexplained is unknown.

use super::hsv::hsv::{Hsv, HsvRange};
use super::{BLACK, ColorClassifier, ColorLabel, GRAY, WHITE, is_too_small};
use crate::config::ColorConfig;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named colour made of one or more HSV ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedColorRange {
    pub name: String,
    pub ranges: Vec<HsvRange>,
}

impl NamedColorRange {
    pub fn new(name: impl Into<String>, ranges: Vec<HsvRange>) -> Self {
        Self {
            name: name.into(),
            ranges,
        }
    }

    pub fn contains(&self, hsv: &Hsv) -> bool {
        self.ranges.iter().any(|range| range.contains(hsv))
    }
}

/// Cut-offs for the black/grey/white fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeutralThresholds {
    pub max_saturation: f64,
    pub black_max_value: f64,
    pub white_min_value: f64,
}

/// Per-colour vote totals for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeVotes {
    pub counts: Vec<usize>,
    pub total_pixels: usize,
    pub mean_saturation: f64,
    pub mean_value: f64,
}

#[derive(Debug, Clone)]
pub struct RangeVotingClassifier {
    colors: Vec<NamedColorRange>,
    min_coverage: f64,
    neutral: NeutralThresholds,
}

impl RangeVotingClassifier {
    pub fn from_config(config: &ColorConfig) -> Self {
        Self {
            colors: config.ranges.clone(),
            min_coverage: config.min_coverage,
            neutral: NeutralThresholds {
                max_saturation: config.neutral_max_saturation,
                black_max_value: config.black_max_value,
                white_min_value: config.white_min_value,
            },
        }
    }

    pub fn votes(&self, region: &RgbImage) -> RangeVotes {
        let mut counts = vec![0usize; self.colors.len()];
        let mut saturation_sum = 0u64;
        let mut value_sum = 0u64;
        for pixel in region.pixels() {
            let hsv = Hsv::from_rgb(pixel);
            saturation_sum += hsv.saturation as u64;
            value_sum += hsv.value as u64;
            for (count, color) in counts.iter_mut().zip(&self.colors) {
                if color.contains(&hsv) {
                    *count += 1;
                }
            }
        }
        let total_pixels = region.width() as usize * region.height() as usize;
        let denominator = total_pixels.max(1) as f64;
        RangeVotes {
            counts,
            total_pixels,
            mean_saturation: saturation_sum as f64 / denominator,
            mean_value: value_sum as f64 / denominator,
        }
    }

    fn neutral_fallback(&self, votes: &RangeVotes) -> ColorLabel {
        if votes.mean_saturation >= self.neutral.max_saturation {
            return ColorLabel::Unknown;
        }
        if votes.mean_value < self.neutral.black_max_value {
            ColorLabel::named(BLACK)
        } else if votes.mean_value > self.neutral.white_min_value {
            ColorLabel::named(WHITE)
        } else {
            ColorLabel::named(GRAY)
        }
    }
}

impl ColorClassifier for RangeVotingClassifier {
    fn classify(&self, region: &RgbImage) -> ColorLabel {
        if is_too_small(region) {
            return ColorLabel::NotApplicable;
        }

        let votes = self.votes(region);
        let mut winner: Option<(usize, usize)> = None;
        for (index, count) in votes.counts.iter().enumerate() {
            if *count > 0 && winner.is_none_or(|(_, best)| *count > best) {
                winner = Some((index, *count));
            }
        }

        if let Some((index, count)) = winner {
            let share = count as f64 / votes.total_pixels as f64;
            debug!(
                color = %self.colors[index].name,
                share,
                floor = self.min_coverage,
                "range vote winner"
            );
            if share >= self.min_coverage {
                return ColorLabel::named(&self.colors[index].name);
            }
        }

        self.neutral_fallback(&votes)
    }
}
