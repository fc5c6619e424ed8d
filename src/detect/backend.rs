use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Person detector backend.
///
/// Implementations return *person* detections only: class filtering and the
/// confidence threshold are applied inside the backend, so callers never see
/// vehicles, animals, or low-confidence noise. A call may fail without
/// crashing the owning camera worker; the worker treats a failure like any
/// other transient acquisition error.
pub trait Detector: Send {
    /// Backend identifier, surfaced in logs.
    fn name(&self) -> &'static str;

    /// Run person detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
