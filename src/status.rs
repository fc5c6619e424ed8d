//! Status snapshots.
//!
//! A snapshot is the engine's complete observable state at one instant:
//! every camera, every zone, and the relay. Snapshots are assembled by the
//! monitor's publisher thread and handed to a `StatusSink`; the engine never
//! cares what the sink does with them.

use serde::Serialize;

use crate::relay::RelayStatus;
use crate::worker::CameraStatus;
use crate::zone::ZoneStatus;

/// Complete point-in-time view of the engine.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub generated_at_epoch_s: u64,
    pub cameras: Vec<CameraStatus>,
    pub zones: Vec<ZoneStatus>,
    pub relay: RelayStatus,
}

impl StatusSnapshot {
    /// Number of zones currently occupied.
    pub fn occupied_zones(&self) -> usize {
        self.zones.iter().filter(|zone| zone.occupied).count()
    }
}

/// Consumer of status snapshots.
pub trait StatusSink: Send {
    fn publish(&mut self, snapshot: &StatusSnapshot);
}

/// Sink that writes each snapshot to the log, one summary line plus the
/// full snapshot as JSON at debug level.
pub struct LogSink;

impl StatusSink for LogSink {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        let streaming = snapshot
            .cameras
            .iter()
            .filter(|camera| {
                matches!(camera.connection, crate::worker::ConnectionState::Streaming)
            })
            .count();
        log::info!(
            "status: {}/{} cameras streaming, {}/{} zones occupied, relay {}",
            streaming,
            snapshot.cameras.len(),
            snapshot.occupied_zones(),
            snapshot.zones.len(),
            if snapshot.relay.active { "active" } else { "inactive" }
        );
        if log::log_enabled!(log::Level::Debug) {
            match serde_json::to_string(snapshot) {
                Ok(json) => log::debug!("status snapshot: {}", json),
                Err(e) => log::debug!("status snapshot unserializable: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ConnectionState;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            generated_at_epoch_s: 1_700_000_000,
            cameras: vec![CameraStatus {
                id: "dock".to_string(),
                name: "Dock".to_string(),
                source: "stub://dock".to_string(),
                connection: ConnectionState::Error("stream lost".to_string()),
                frames_captured: 42,
                last_frame_epoch_s: Some(1_699_999_999),
                connection_attempts: 3,
            }],
            zones: vec![
                ZoneStatus {
                    id: "bay_1".to_string(),
                    camera_id: "dock".to_string(),
                    name: "Bay 1".to_string(),
                    occupied: true,
                    changed_at_epoch_s: 1_699_999_998,
                },
                ZoneStatus {
                    id: "bay_2".to_string(),
                    camera_id: "dock".to_string(),
                    name: "Bay 2".to_string(),
                    occupied: false,
                    changed_at_epoch_s: 1_699_999_990,
                },
            ],
            relay: RelayStatus {
                active: true,
                changed_at_epoch_s: 1_699_999_998,
                output_pin: 17,
                active_high: true,
                deactivation_delay_secs: 0.5,
            },
        }
    }

    #[test]
    fn counts_occupied_zones() {
        assert_eq!(snapshot().occupied_zones(), 1);
    }

    #[test]
    fn serializes_with_tagged_connection_state() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["cameras"][0]["state"], "error");
        assert_eq!(json["cameras"][0]["reason"], "stream lost");
        assert_eq!(json["zones"][0]["occupied"], true);
        assert_eq!(json["relay"]["active"], true);
        assert_eq!(json["relay"]["output_pin"], 17);
    }
}
