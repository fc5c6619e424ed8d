//! zoneguard: a zone presence engine.
//!
//! Cameras stream frames, a person detector finds people, and each detected
//! person's foot point is tested against operator-drawn polygon zones. The
//! OR of every zone's occupancy drives a single debounced relay output:
//! engage the instant anyone is present anywhere, release only after a
//! configurable delay once everything has cleared.
//!
//! The building blocks compose bottom-up: [`geometry`] and [`detect`] are
//! pure, [`zone`] and [`relay`] hold state behind capability traits, and
//! [`monitor::ZoneMonitor`] owns the threads that connect them. Hardware
//! access (RTSP ingest, ONNX inference, GPIO) sits behind traits with
//! software fallbacks, so the whole engine runs and tests without a single
//! camera or pin attached.

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod monitor;
pub mod relay;
pub mod status;
pub mod worker;
pub mod zone;

pub use config::MonitorConfig;
pub use monitor::{MonitorEvent, ZoneMonitor};
pub use status::{LogSink, StatusSink, StatusSnapshot};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating at zero for pre-epoch clocks.
pub(crate) fn epoch_s(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
