use anyhow::{anyhow, Result};
use rand::Rng;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Development-mode detector that reports a person at random.
///
/// Stands in for the accelerator on machines without one. Each frame has a
/// fixed probability of producing a single detection at a random position.
pub struct SimulatedDetector {
    probability: f64,
}

impl SimulatedDetector {
    /// `probability` is the per-frame chance of a detection, 0..=1.
    pub fn new(probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(anyhow!(
                "simulated detection probability must be within 0..=1, got {}",
                probability
            ));
        }
        Ok(Self { probability })
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        // One in five frames, matching the original development default.
        Self { probability: 0.2 }
    }
}

impl Detector for SimulatedDetector {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.probability) {
            let x = rng.gen_range(0.0f32..0.8);
            let y = rng.gen_range(0.0f32..0.5);
            Ok(vec![Detection {
                x,
                y,
                w: 0.2,
                h: 0.5,
                confidence: rng.gen_range(0.5f32..1.0),
            }])
        } else {
            Ok(Vec::new())
        }
    }
}
