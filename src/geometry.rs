//! Pixel-space polygon geometry.
//!
//! Zones are drawn as polygons in the coordinate space of a camera's
//! reference snapshot. Live frames do not always arrive at that resolution,
//! so every containment test goes through `Polygon::contains_projected`,
//! which rescales the query point into the polygon's reference space first.
//! Skipping that projection is a correctness bug, not a runtime error.

use serde::{Deserialize, Serialize};

/// A point in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An operator-drawn polygon, stored with the resolution it was drawn at.
///
/// The vertex list is treated as implicitly closed: the last vertex connects
/// back to the first whether or not the stored sequence repeats it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point>,
    /// Width of the reference snapshot the polygon was drawn on.
    pub reference_width: u32,
    /// Height of the reference snapshot the polygon was drawn on.
    pub reference_height: u32,
}

impl Polygon {
    pub fn new(points: Vec<Point>, reference_width: u32, reference_height: u32) -> Self {
        Self {
            points,
            reference_width,
            reference_height,
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Even-odd (ray casting) point-in-polygon test in reference space.
    ///
    /// Assumes a valid polygon (>= 3 vertices); config validation rejects
    /// degenerate input before it gets here. Points lying exactly on an edge
    /// may be classified either way; callers must not rely on edge behavior.
    pub fn contains(&self, point: Point) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.points[i];
            let pj = self.points[j];
            let crosses = (pi.y > point.y) != (pj.y > point.y);
            if crosses {
                let x_at_y = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
                if point.x < x_at_y {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Containment test for a point expressed in a live frame's coordinate
    /// space. The point is rescaled into the polygon's reference space when
    /// the frame resolution differs.
    pub fn contains_projected(&self, point: Point, frame_width: u32, frame_height: u32) -> bool {
        if frame_width == 0 || frame_height == 0 {
            return false;
        }
        let projected =
            if frame_width == self.reference_width && frame_height == self.reference_height {
                point
            } else {
                Point {
                    x: point.x * self.reference_width as f64 / frame_width as f64,
                    y: point.y * self.reference_height as f64 / frame_height as f64,
                }
            };
        self.contains(projected)
    }
}
