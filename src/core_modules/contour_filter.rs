// THEORY:
// The vehicle filter rejects outlines that cannot be a car before any spot is
// tested. Two cheap attributes do the work: the enclosed area (too small is
// noise or a painted line, too large is several cars or the lot itself fused
// together) and the bounding-box aspect ratio. Both bounds are exclusive.

use crate::config::VehicleFilterConfig;
use crate::core_modules::edge_contours::VehicleContour;

#[derive(Debug, Clone, Copy)]
pub struct VehicleContourFilter {
    config: VehicleFilterConfig,
}

impl VehicleContourFilter {
    pub fn new(config: VehicleFilterConfig) -> Self {
        Self { config }
    }

    pub fn accepts(&self, contour: &VehicleContour) -> bool {
        let area = contour.area;
        let aspect = contour.aspect_ratio();
        self.config.min_area < area
            && area < self.config.max_area
            && self.config.min_aspect_ratio < aspect
            && aspect < self.config.max_aspect_ratio
    }

    /// Keeps the plausible vehicles, preserving their order.
    pub fn filter(&self, contours: Vec<VehicleContour>) -> Vec<VehicleContour> {
        contours.into_iter().filter(|contour| self.accepts(contour)).collect()
    }
}
