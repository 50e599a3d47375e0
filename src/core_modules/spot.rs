// THEORY:
// The `spot` module holds the static geometry of the parking lot: integer
// points, the shape of each labeled spot, and the polygon area helper that every
// other layer relies on. These are "dumb" data containers, owned by the
// configuration and never mutated while a stream runs.
//
// Key architectural principles:
// 1.  **Tagged Shapes**: A spot is described by a `SpotShape` variant rather than
//     a bare point list, so a rectangle can be declared directly next to
//     hand-picked polygons. Every consumer goes through `vertices()`.
// 2.  **One Area Definition**: `polygon_area` is the unsigned shoelace area used
//     both for validating spots and for the intersection threshold, so the two
//     can never disagree.

use serde::{Deserialize, Serialize};

pub type SpotId = u32;
pub type Area = f64;

/// A 2D integer point in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for imageproc::point::Point<i32> {
    fn from(point: Point) -> Self {
        imageproc::point::Point::new(point.x, point.y)
    }
}

/// The outline of a single parking spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpotShape {
    /// A simple closed polygon; the closing edge is implicit.
    Polygon { points: Vec<Point> },
    /// An axis-aligned rectangle with its top-left corner at `(x, y)`.
    Rectangle {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
}

impl SpotShape {
    pub fn polygon<P: Into<Point>>(points: impl IntoIterator<Item = P>) -> Self {
        SpotShape::Polygon {
            points: points.into_iter().map(Into::into).collect(),
        }
    }

    /// The boundary of the shape as an ordered vertex list.
    pub fn vertices(&self) -> Vec<Point> {
        match self {
            SpotShape::Polygon { points } => points.clone(),
            SpotShape::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                let right = x.saturating_add(i32::try_from(*width).unwrap_or(i32::MAX));
                let bottom = y.saturating_add(i32::try_from(*height).unwrap_or(i32::MAX));
                vec![
                    Point::new(*x, *y),
                    Point::new(right, *y),
                    Point::new(right, bottom),
                    Point::new(*x, bottom),
                ]
            }
        }
    }

    pub fn area(&self) -> Area {
        polygon_area(&self.vertices())
    }

    /// False when a rectangle's far corner does not fit in pixel coordinates.
    pub fn is_representable(&self) -> bool {
        match self {
            SpotShape::Polygon { .. } => true,
            SpotShape::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                let fits = |origin: i32, extent: u32| {
                    i32::try_from(extent)
                        .ok()
                        .and_then(|extent| origin.checked_add(extent))
                        .is_some()
                };
                fits(*x, *width) && fits(*y, *height)
            }
        }
    }
}

/// A labeled parking spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpot {
    pub id: SpotId,
    #[serde(flatten)]
    pub shape: SpotShape,
}

impl ParkingSpot {
    pub fn new(id: SpotId, shape: SpotShape) -> Self {
        Self { id, shape }
    }
}

/// Unsigned polygon area by the shoelace formula.
///
/// Orientation is ignored; fewer than three vertices yield zero.
pub fn polygon_area(points: &[Point]) -> Area {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, current) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        twice_area += current.x as i64 * next.y as i64 - next.x as i64 * current.y as i64;
    }
    twice_area.abs() as Area / 2.0
}
