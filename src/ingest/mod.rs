//! Frame acquisition sources.
//!
//! A camera worker owns exactly one `FrameSource` at a time and drives it
//! through connect / next_frame / stop. Sources are expected to block inside
//! `next_frame`; everything downstream of acquisition is fast and
//! non-blocking.
//!
//! Shipped sources:
//! - `stub://` synthetic frames (always available, used by tests and demos)
//! - RTSP via GStreamer (feature: rtsp-gstreamer)

pub mod rtsp;

pub use rtsp::{RtspConfig, RtspSource};

use anyhow::Result;

use crate::frame::Frame;

/// Acquisition capability: a started, pollable, stoppable stream of frames.
pub trait FrameSource: Send {
    /// Open the underlying stream. Must be called before `next_frame`.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next decoded frame is available.
    ///
    /// A returned error is transient from the engine's point of view: the
    /// owning worker goes through its error/backoff cycle and reconnects.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the stream. Idempotent; safe to call when never connected.
    fn stop(&mut self);

    /// Whether the source currently looks usable.
    fn is_healthy(&self) -> bool;

    /// Acquisition counters for status reporting.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}
