use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub detector that turns pixel changes into a centered person detection.
///
/// Hashes each frame and reports one detection whenever the hash differs from
/// the previous frame's. Useful against synthetic sources, which mutate their
/// scene periodically.
pub struct MotionStubDetector {
    last_hash: Option<[u8; 32]>,
}

impl MotionStubDetector {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for MotionStubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for MotionStubDetector {
    fn name(&self) -> &'static str {
        "motion-stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(&frame.pixels).into();

        let motion = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };
        self.last_hash = Some(current_hash);

        if motion {
            // A person-sized box in the middle of the frame; its foot point
            // lands at (0.5, 0.75) of the frame.
            Ok(vec![Detection {
                x: 0.4,
                y: 0.25,
                w: 0.2,
                h: 0.5,
                confidence: 0.85,
            }])
        } else {
            Ok(Vec::new())
        }
    }
}
