// THEORY:
// The `EdgeContourExtractor` is the detection layer. It turns the prepared
// grayscale frame into a list of closed outlines, each a candidate vehicle.
//
// Key architectural principles & algorithm steps:
// 1.  **Edges**: A Canny detector with low/high hysteresis thresholds produces a
//     thin binary edge map. A parked car shows up as a broken outline plus some
//     internal edges (windows, roof line).
// 2.  **Closing**: Dilating N times and then eroding N times with a square
//     element welds those fragments into one solid blob per vehicle. Kernel size
//     and iteration count are the most sensitive knobs in the whole system: too
//     little leaves fragments that never form a contour, too much fuses
//     neighbouring cars and pavement texture.
// 3.  **Re-masking**: Dilation grows shapes outward, so the closed map is masked
//     with the area of interest a second time.
// 4.  **External contours only**: Holes inside a blob say nothing about
//     occupancy, so only outermost borders are kept.
// 5.  **Stateless Utility**: Nothing survives from one frame to the next.

use crate::config::EdgeConfig;
use crate::core_modules::region_mask::{RegionMask, fill_polygon};
use crate::core_modules::spot::{Area, Point, polygon_area};
use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::{dilate, erode};
use serde::Serialize;

/// Sigma of the Gaussian that `imageproc::edges::canny` applies to its input.
pub const CANNY_SMOOTHING_SIGMA: f32 = 1.4;

/// An axis-aligned box in pixels; `width`/`height` count pixels inclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One past the right-most column.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom-most row.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Grows the box by `padding` on every side, clamped to a `frame_width` x `frame_height` frame.
    pub fn padded(&self, padding: u32, frame_width: u32, frame_height: u32) -> Self {
        let x = self.x.saturating_sub(padding).min(frame_width);
        let y = self.y.saturating_sub(padding).min(frame_height);
        let right = self.right().saturating_add(padding).min(frame_width);
        let bottom = self.bottom().saturating_add(padding).min(frame_height);
        Self::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}

/// A closed outline found in the edge map, with the attributes the filter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleContour {
    pub points: Vec<Point>,
    pub area: Area,
    pub bounding_box: BoundingBox,
}

impl VehicleContour {
    /// Builds a contour from its boundary points; `None` for an empty outline.
    pub fn from_points(points: Vec<Point>) -> Option<Self> {
        let first = *points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in &points {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        let min_x = min_x.max(0);
        let min_y = min_y.max(0);
        let bounding_box = BoundingBox::new(
            min_x as u32,
            min_y as u32,
            (max_x - min_x + 1).max(0) as u32,
            (max_y - min_y + 1).max(0) as u32,
        );
        Some(Self {
            area: polygon_area(&points),
            points,
            bounding_box,
        })
    }

    /// `width / height` of the bounding box; zero when the height is zero.
    pub fn aspect_ratio(&self) -> f64 {
        if self.bounding_box.height == 0 {
            return 0.0;
        }
        self.bounding_box.width as f64 / self.bounding_box.height as f64
    }

    /// The contour as a filled region on a `width` x `height` canvas.
    pub fn rasterize(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        fill_polygon(&mut mask, &self.points);
        mask
    }
}

/// Intermediate binary maps of one extraction, for debug display.
#[derive(Debug, Clone)]
pub struct EdgeMaps {
    pub canny: GrayImage,
    pub closed: GrayImage,
}

/// The result of running the extractor over one prepared frame.
#[derive(Debug, Clone)]
pub struct ContourExtraction {
    pub contours: Vec<VehicleContour>,
    pub maps: EdgeMaps,
}

#[derive(Debug, Clone)]
pub struct EdgeContourExtractor {
    config: EdgeConfig,
}

impl EdgeContourExtractor {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn detect_edges(&self, prepared: &GrayImage) -> GrayImage {
        canny(prepared, self.config.canny_low, self.config.canny_high)
    }

    /// Morphological closing: `close_iterations` dilations, then as many erosions.
    pub fn close(&self, edges: &GrayImage) -> GrayImage {
        let radius = (self.config.close_kernel_size / 2).min(u8::MAX as u32) as u8;
        if radius == 0 || self.config.close_iterations == 0 {
            return edges.clone();
        }
        let mut closed = edges.clone();
        for _ in 0..self.config.close_iterations {
            closed = dilate(&closed, Norm::LInf, radius);
        }
        for _ in 0..self.config.close_iterations {
            closed = erode(&closed, Norm::LInf, radius);
        }
        closed
    }

    pub fn extract(
        &self,
        prepared: &GrayImage,
        area_of_interest: &RegionMask,
    ) -> ContourExtraction {
        let canny = self.detect_edges(prepared);
        let closed = area_of_interest.apply(&self.close(&canny));
        let contours = external_contours(&closed);
        ContourExtraction {
            contours,
            maps: EdgeMaps { canny, closed },
        }
    }
}

/// Outermost borders of the non-zero regions of a binary image, in scan order.
pub fn external_contours(binary: &GrayImage) -> Vec<VehicleContour> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|contour| {
            matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none()
        })
        .filter_map(|contour| {
            let points = contour
                .points
                .into_iter()
                .map(|point| Point::new(point.x, point.y))
                .collect();
            VehicleContour::from_points(points)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    fn full_roi(width: u32, height: u32) -> RegionMask {
        let (right, bottom) = (width as i32 - 1, height as i32 - 1);
        RegionMask::from_polygon(
            width,
            height,
            &[
                Point::new(0, 0),
                Point::new(right, 0),
                Point::new(right, bottom),
                Point::new(0, bottom),
            ],
        )
    }

    #[test]
    fn holes_are_not_reported() {
        let mut binary = GrayImage::new(40, 40);
        draw_hollow_rect_mut(&mut binary, Rect::at(10, 10).of_size(20, 20), Luma([255]));
        let contours = external_contours(&binary);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_box, BoundingBox::new(10, 10, 20, 20));
        assert_eq!(contours[0].area, 19.0 * 19.0);
    }

    #[test]
    fn separate_blobs_give_separate_contours() {
        let mut binary = GrayImage::new(60, 30);
        draw_filled_rect_mut(&mut binary, Rect::at(2, 2).of_size(10, 10), Luma([255]));
        draw_filled_rect_mut(&mut binary, Rect::at(30, 5).of_size(20, 15), Luma([255]));
        let mut boxes: Vec<_> = external_contours(&binary)
            .into_iter()
            .map(|contour| contour.bounding_box)
            .collect();
        boxes.sort_by_key(|bbox| bbox.x);
        assert_eq!(
            boxes,
            vec![BoundingBox::new(2, 2, 10, 10), BoundingBox::new(30, 5, 20, 15)]
        );
    }

    #[test]
    fn solid_shape_becomes_one_closed_blob() {
        let mut prepared = GrayImage::new(100, 80);
        draw_filled_rect_mut(&mut prepared, Rect::at(30, 20).of_size(40, 30), Luma([200]));
        let extractor = EdgeContourExtractor::new(EdgeConfig {
            canny_low: 30.0,
            canny_high: 60.0,
            close_kernel_size: 5,
            close_iterations: 2,
        });
        let extraction = extractor.extract(&prepared, &full_roi(100, 80));
        assert_eq!(extraction.contours.len(), 1);
        let bbox = extraction.contours[0].bounding_box;
        assert!(bbox.x.abs_diff(30) <= 3, "{bbox:?}");
        assert!(bbox.y.abs_diff(20) <= 3, "{bbox:?}");
        assert!(bbox.width.abs_diff(40) <= 6, "{bbox:?}");
        assert!(bbox.height.abs_diff(30) <= 6, "{bbox:?}");
        assert!(extraction.maps.canny.iter().any(|value| *value > 0));
    }

    #[test]
    fn closed_edges_are_remasked_to_the_area_of_interest() {
        let mut prepared = GrayImage::new(100, 80);
        draw_filled_rect_mut(&mut prepared, Rect::at(60, 20).of_size(30, 30), Luma([200]));
        let left_half = RegionMask::from_polygon(
            100,
            80,
            &[
                Point::new(0, 0),
                Point::new(49, 0),
                Point::new(49, 79),
                Point::new(0, 79),
            ],
        );
        let extractor = EdgeContourExtractor::new(EdgeConfig::default());
        let extraction = extractor.extract(&prepared, &left_half);
        assert!(extraction.contours.is_empty());
        let outside = |(x, _, value): (u32, u32, &Luma<u8>)| x >= 50 && value[0] > 0;
        assert!(!extraction.maps.closed.enumerate_pixels().any(outside));
    }

    #[test]
    fn zero_height_contour_has_zero_aspect_ratio() {
        let contour = VehicleContour {
            points: vec![Point::new(0, 0), Point::new(5, 0)],
            area: 0.0,
            bounding_box: BoundingBox::new(0, 0, 6, 0),
        };
        assert_eq!(contour.aspect_ratio(), 0.0);
    }

    #[test]
    fn padding_is_clamped_to_the_frame() {
        let bbox = BoundingBox::new(5, 10, 20, 20);
        assert_eq!(bbox.padded(25, 100, 100), BoundingBox::new(0, 0, 50, 55));
        assert_eq!(bbox.padded(3, 100, 100), BoundingBox::new(2, 7, 26, 26));
        assert_eq!(
            BoundingBox::new(90, 90, 10, 10).padded(25, 100, 100),
            BoundingBox::new(65, 65, 35, 35)
        );
    }
}
