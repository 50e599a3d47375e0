// THEORY:
// `RegionMask` turns a polygon into a binary grid of the frame's size. It is the
// only rasterizer in the system: the area of interest, every parking spot and
// every candidate vehicle contour go through `fill_polygon`, so "inside" means
// exactly the same thing for all of them.
//
// Masks follow the usual 8-bit convention: 255 marks a pixel inside the region,
// 0 marks a pixel outside. Boundary pixels are inside.

use crate::core_modules::spot::Point;
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};

pub const INSIDE: Luma<u8> = Luma([255]);

/// A binary mask built from a polygon, with its pixel count cached.
#[derive(Debug, Clone)]
pub struct RegionMask {
    mask: GrayImage,
    pixel_count: usize,
}

impl RegionMask {
    pub fn from_polygon(width: u32, height: u32, points: &[Point]) -> Self {
        let mut mask = GrayImage::new(width, height);
        fill_polygon(&mut mask, points);
        Self::from_image(mask)
    }

    pub fn from_image(mask: GrayImage) -> Self {
        let pixel_count = count_set(&mask);
        Self { mask, pixel_count }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.mask
    }

    /// Number of pixels inside the region.
    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] > 0
    }

    /// Zeroes every pixel of `image` that falls outside the region.
    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let mut masked = image.clone();
        for (value, inside) in masked.iter_mut().zip(self.mask.iter()) {
            if *inside == 0 {
                *value = 0;
            }
        }
        masked
    }
}

/// Rasterizes a closed polygon (boundary included) into `canvas`.
///
/// Repeated vertices and an explicit closing vertex are tolerated; shapes that
/// collapse to a segment or a single point still mark their pixels.
pub fn fill_polygon(canvas: &mut GrayImage, points: &[Point]) {
    let mut outline: Vec<imageproc::point::Point<i32>> = Vec::with_capacity(points.len());
    for point in points {
        let point = imageproc::point::Point::from(*point);
        if outline.last() != Some(&point) {
            outline.push(point);
        }
    }
    while outline.len() > 1 && outline.first() == outline.last() {
        outline.pop();
    }

    match outline.len() {
        0 => {}
        1 => {
            let p = outline[0];
            if p.x >= 0
                && p.y >= 0
                && (p.x as u32) < canvas.width()
                && (p.y as u32) < canvas.height()
            {
                canvas.put_pixel(p.x as u32, p.y as u32, INSIDE);
            }
        }
        2 => draw_line_segment_mut(
            canvas,
            (outline[0].x as f32, outline[0].y as f32),
            (outline[1].x as f32, outline[1].y as f32),
            INSIDE,
        ),
        _ => draw_polygon_mut(canvas, &outline, INSIDE),
    }
}

pub fn count_set(mask: &GrayImage) -> usize {
    mask.iter().filter(|value| **value > 0).count()
}
