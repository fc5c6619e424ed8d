use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector that plays back a fixed script of per-frame detections.
///
/// Each `detect` call pops the next entry; once the script is exhausted every
/// further call returns no detections. Deterministic, for tests and demos.
pub struct ScriptedDetector {
    script: VecDeque<Vec<Detection>>,
}

impl ScriptedDetector {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Vec<Detection>>,
    {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Remaining scripted entries.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_script_then_goes_quiet() {
        let person = Detection {
            x: 0.4,
            y: 0.2,
            w: 0.2,
            h: 0.6,
            confidence: 0.9,
        };
        let mut det = ScriptedDetector::new(vec![vec![person], vec![]]);
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).unwrap();
        assert_eq!(det.remaining(), 2);
        assert_eq!(det.detect(&frame).unwrap().len(), 1);
        assert_eq!(det.remaining(), 1);
        assert!(det.detect(&frame).unwrap().is_empty());
        assert_eq!(det.remaining(), 0);
        assert!(det.detect(&frame).unwrap().is_empty());
        assert_eq!(det.remaining(), 0);
    }
}
