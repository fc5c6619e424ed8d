use crate::geometry::Point;

/// Minimum confidence for a detection to reach the zone tables.
///
/// Backends apply this (or an operator override) before returning, so the
/// engine only ever sees detections it should act on.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// One detected person in a frame.
///
/// Coordinates are normalized to 0..1 of the frame the detection came from,
/// with `x`/`y` at the top-left of the bounding box. Detections are transient:
/// they are consumed within the evaluation cycle that produced them.
#[derive(Clone, Copy, Debug)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

impl Detection {
    /// Representative point for zone containment: the bottom-center of the
    /// bounding box, i.e. roughly where the person's feet meet the ground.
    /// Returned in the pixel space of the given frame resolution.
    pub fn foot_point(&self, frame_width: u32, frame_height: u32) -> Point {
        Point {
            x: (self.x + self.w / 2.0) as f64 * frame_width as f64,
            y: (self.y + self.h) as f64 * frame_height as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foot_point_is_bottom_center_in_pixels() {
        let det = Detection {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence: 0.9,
        };
        let p = det.foot_point(640, 480);
        assert!((p.x - 320.0).abs() < 1e-6);
        assert!((p.y - 360.0).abs() < 1e-6);
    }
}
