// THEORY:
// The `SpotIntersectionEvaluator` decides, for one frame, whether each spot has a
// vehicle in it. It owns the per-run geometry: every spot polygon is rasterized
// once into a mask of the frame's size and its polygon area is cached beside it.
// Contours change every frame, so they are rasterized once per frame into
// `ContourMask`s that all spots then read.
//
// A spot is occupied this frame by the first accepted contour, in extraction
// order, whose filled region shares strictly more than
// `spot_area * min_intersection_fraction` pixels with the spot mask. The match
// also fixes the colour candidate: the contour's bounding box grown by the
// padding and clamped to the frame.

use crate::core_modules::edge_contours::{BoundingBox, VehicleContour};
use crate::core_modules::region_mask::RegionMask;
use crate::core_modules::spot::{Area, ParkingSpot, SpotId};
use image::{GrayImage, RgbImage, imageops};

/// A spot's cached raster and polygon area.
#[derive(Debug, Clone)]
pub struct SpotGeometry {
    pub id: SpotId,
    pub mask: RegionMask,
    pub area: Area,
}

/// An accepted contour together with its filled raster.
#[derive(Debug, Clone)]
pub struct ContourMask {
    pub contour: VehicleContour,
    mask: GrayImage,
}

impl ContourMask {
    pub fn new(contour: VehicleContour, width: u32, height: u32) -> Self {
        let mask = contour.rasterize(width, height);
        Self { contour, mask }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.mask
    }

    /// Pixels shared with `spot`. Only the contour's bounding box can contribute.
    pub fn intersection_pixels(&self, spot: &RegionMask) -> usize {
        let bbox = self.contour.bounding_box;
        let right = bbox.right().min(self.mask.width()).min(spot.width());
        let bottom = bbox.bottom().min(self.mask.height()).min(spot.height());
        let spot = spot.as_image();
        let mut count = 0;
        for y in bbox.y..bottom {
            for x in bbox.x..right {
                if self.mask.get_pixel(x, y)[0] > 0 && spot.get_pixel(x, y)[0] > 0 {
                    count += 1;
                }
            }
        }
        count
    }
}

/// The contour that occupied a spot this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotMatch {
    /// Position of the contour in the accepted list.
    pub contour_index: usize,
    pub intersection_pixels: usize,
    /// Padded, frame-clamped bounding box handed to the colour classifier.
    pub vehicle_region: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct SpotIntersectionEvaluator {
    spots: Vec<SpotGeometry>,
    frame_width: u32,
    frame_height: u32,
    min_intersection_fraction: f64,
    region_padding: u32,
}

impl SpotIntersectionEvaluator {
    /// Rasterizes every spot; the evaluator keeps them ordered by id.
    pub fn new(
        spots: &[ParkingSpot],
        frame_width: u32,
        frame_height: u32,
        min_intersection_fraction: f64,
        region_padding: u32,
    ) -> Self {
        let mut geometry: Vec<SpotGeometry> = spots
            .iter()
            .map(|spot| SpotGeometry {
                id: spot.id,
                mask: RegionMask::from_polygon(frame_width, frame_height, &spot.shape.vertices()),
                area: spot.shape.area(),
            })
            .collect();
        geometry.sort_by_key(|spot| spot.id);
        Self {
            spots: geometry,
            frame_width,
            frame_height,
            min_intersection_fraction,
            region_padding,
        }
    }

    pub fn spots(&self) -> &[SpotGeometry] {
        &self.spots
    }

    pub fn rasterize(&self, contours: Vec<VehicleContour>) -> Vec<ContourMask> {
        contours
            .into_iter()
            .map(|contour| ContourMask::new(contour, self.frame_width, self.frame_height))
            .collect()
    }

    /// First contour, in order, that occupies `spot`.
    pub fn evaluate(&self, spot: &SpotGeometry, contours: &[ContourMask]) -> Option<SpotMatch> {
        contours.iter().enumerate().find_map(|(contour_index, contour)| {
            let intersection_pixels = contour.intersection_pixels(&spot.mask);
            let fraction = self.min_intersection_fraction;
            if !occupies(intersection_pixels, spot.area, fraction) {
                return None;
            }
            Some(SpotMatch {
                contour_index,
                intersection_pixels,
                vehicle_region: contour.contour.bounding_box.padded(
                    self.region_padding,
                    self.frame_width,
                    self.frame_height,
                ),
            })
        })
    }
}

/// The occupancy test: strictly more overlap than the required share of the spot.
pub fn occupies(
    intersection_pixels: usize,
    spot_area: Area,
    min_intersection_fraction: f64,
) -> bool {
    intersection_pixels as f64 > spot_area * min_intersection_fraction
}

/// Copies `region` out of `frame`.
pub fn crop_region(frame: &RgbImage, region: BoundingBox) -> RgbImage {
    imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image()
}
