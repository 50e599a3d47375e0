// THEORY:
// Filtered dominant-colour classification. A vehicle region also contains
// windows, tyres, shadow and a margin of pavement, so the region is first
// stripped of pixels that are both dull (low saturation) and dark (low value).
// The survivors are collapsed into a single centroid and the centroid is
// snapped to the nearest entry of a small reference palette.
//
// The centroid is a one-cluster k-means. With k = 1 the assignment step is
// trivial and the update step is the mean, so it converges in one pass and
// needs no random initialisation.

use super::hsv::hsv::Hsv;
use super::{BLACK, ColorClassifier, ColorLabel, is_too_small};
use crate::config::ColorConfig;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A named reference colour in RGB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteColor {
    pub name: String,
    pub rgb: [u8; 3],
}

impl PaletteColor {
    pub fn new(name: impl Into<String>, rgb: [u8; 3]) -> Self {
        Self {
            name: name.into(),
            rgb,
        }
    }
}

/// Snaps the mean of the informative pixels to the nearest palette colour.
#[derive(Debug, Clone)]
pub struct DominantPaletteClassifier {
    palette: Vec<PaletteColor>,
    tolerance: f64,
    min_saturation: u8,
    min_value: u8,
    dark_value_cutoff: f64,
}

impl DominantPaletteClassifier {
    pub fn from_config(config: &ColorConfig) -> Self {
        Self {
            palette: config.palette.clone(),
            tolerance: config.palette_tolerance,
            min_saturation: config.filter_min_saturation,
            min_value: config.filter_min_value,
            dark_value_cutoff: config.dark_value_cutoff,
        }
    }

    /// Pixels that carry paint colour, i.e. not both dull and dark.
    fn informative_pixels(&self, region: &RgbImage) -> (Vec<[f32; 3]>, f64) {
        let mut kept = Vec::with_capacity(region.len() / 3);
        let mut value_sum = 0u64;
        for pixel in region.pixels() {
            let hsv = Hsv::from_rgb(pixel);
            value_sum += hsv.value as u64;
            if hsv.saturation < self.min_saturation && hsv.value < self.min_value {
                continue;
            }
            kept.push(pixel.0.map(|channel| channel as f32));
        }
        let pixel_count = (region.width() as u64 * region.height() as u64).max(1);
        (kept, value_sum as f64 / pixel_count as f64)
    }

    /// Nearest palette entry and its distance. Earlier entries win ties.
    pub fn nearest(&self, color: [u8; 3]) -> Option<(&PaletteColor, f64)> {
        let mut best: Option<(&PaletteColor, f64)> = None;
        for entry in &self.palette {
            let distance = rgb_distance(color, entry.rgb);
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((entry, distance));
            }
        }
        best
    }
}

impl ColorClassifier for DominantPaletteClassifier {
    fn classify(&self, region: &RgbImage) -> ColorLabel {
        if is_too_small(region) {
            return ColorLabel::NotApplicable;
        }

        let (pixels, mean_value) = self.informative_pixels(region);
        if pixels.is_empty() {
            // Nothing but glass and shadow: only darkness is left to judge.
            return if mean_value < self.dark_value_cutoff {
                ColorLabel::named(BLACK)
            } else {
                ColorLabel::Unknown
            };
        }

        let Some(centroid) = dominant_centroid(&pixels) else {
            warn!(
                pixels = pixels.len(),
                "dominant colour clustering produced no usable centroid"
            );
            return ColorLabel::NotApplicable;
        };
        let dominant = centroid.map(|channel| channel as u8);
        debug!(?dominant, kept = pixels.len(), "dominant colour of filtered region");

        match self.nearest(dominant) {
            Some((entry, distance)) if distance <= self.tolerance => ColorLabel::named(&entry.name),
            _ => ColorLabel::Unknown,
        }
    }
}

/// Single-cluster centroid of the samples.
///
/// Returns `None` for an empty sample set or a non-finite result.
pub fn dominant_centroid(pixels: &[[f32; 3]]) -> Option<[f32; 3]> {
    if pixels.is_empty() {
        return None;
    }
    let mut sum = [0f64; 3];
    for pixel in pixels {
        for (total, channel) in sum.iter_mut().zip(pixel) {
            *total += *channel as f64;
        }
    }
    let count = pixels.len() as f64;
    let centroid = sum.map(|total| (total / count) as f32);
    centroid
        .iter()
        .all(|channel| channel.is_finite())
        .then_some(centroid)
}

pub fn rgb_distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}
