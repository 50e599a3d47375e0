// THEORY:
// The `FramePreprocessor` produces the single-channel image the edge detector
// works on: grayscale, an optional linear brightness/contrast stretch, a
// Gaussian blur to flatten pavement texture, and the area-of-interest mask. An
// optional inverted binary threshold can be switched on for scenes where
// vehicles are reliably darker than the ground.
//
// The Canny detector smooths its input with its own fixed Gaussian. Blurs
// compose by adding variances, so when the frame goes straight to Canny only
// the remainder `sqrt(sigma^2 - canny_sigma^2)` is applied here and the total
// smoothing equals the configured sigma. The threshold path needs the full
// blur before it binarizes.

use crate::config::{BinaryThreshold, LinearAdjust, PreprocessConfig};
use crate::core_modules::edge_contours::CANNY_SMOOTHING_SIGMA;
use crate::core_modules::region_mask::RegionMask;
use image::{GrayImage, RgbImage, imageops};
use imageproc::filter::gaussian_blur_f32;

#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    config: PreprocessConfig,
    sigma: f32,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            sigma: config.effective_blur_sigma(),
            config,
        }
    }

    /// The blur applied before the frame leaves the preprocessor, `None` for none.
    pub fn applied_sigma(&self) -> Option<f32> {
        if self.config.binary_threshold.is_some() {
            return Some(self.sigma);
        }
        residual_sigma(self.sigma, CANNY_SMOOTHING_SIGMA)
    }

    /// Grayscale, adjust, blur and confine a frame to the area of interest.
    pub fn prepare(&self, frame: &RgbImage, area_of_interest: &RegionMask) -> GrayImage {
        let mut gray = imageops::grayscale(frame);
        if let Some(adjust) = self.config.linear_adjust {
            linear_adjust(&mut gray, adjust);
        }

        let blurred = match self.applied_sigma() {
            Some(sigma) => gaussian_blur_f32(&gray, sigma),
            None => gray,
        };
        let mut masked = area_of_interest.apply(&blurred);

        if let Some(threshold) = self.config.binary_threshold {
            binary_threshold_inverted(&mut masked, threshold);
            masked = area_of_interest.apply(&masked);
        }
        masked
    }
}

/// The extra blur that brings `already` up to `target`; `None` when nothing is left.
pub fn residual_sigma(target: f32, already: f32) -> Option<f32> {
    let variance = target * target - already * already;
    // Below this the kernel is a single tap.
    (variance > 1e-2).then(|| variance.sqrt())
}

/// `saturate(|alpha * x + beta|)` in place.
pub fn linear_adjust(image: &mut GrayImage, adjust: LinearAdjust) {
    for value in image.iter_mut() {
        let scaled = (adjust.alpha * *value as f32 + adjust.beta).abs().round();
        *value = scaled.min(255.0) as u8;
    }
}

/// `x > threshold ? 0 : max_value` in place.
pub fn binary_threshold_inverted(image: &mut GrayImage, threshold: BinaryThreshold) {
    for value in image.iter_mut() {
        *value = if *value > threshold.threshold {
            0
        } else {
            threshold.max_value
        };
    }
}
