//! Per-zone occupancy state.
//!
//! Each zone belongs to exactly one camera and is written only by that
//! camera's worker; the relay controller and status publisher take
//! synchronized reads through the shared table. Occupancy here is raw
//! per-frame state with no debouncing: a zone flips the moment an evaluation
//! says so, and the relay controller owns all smoothing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;

use crate::detect::Detection;
use crate::epoch_s;
use crate::geometry::Polygon;

/// A zone definition: identity plus the polygon it watches.
#[derive(Clone, Debug)]
pub struct Zone {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    pub polygon: Polygon,
}

/// Read-only view of one zone's state, for status snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct ZoneStatus {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    pub occupied: bool,
    /// Epoch seconds of the last occupancy change.
    pub changed_at_epoch_s: u64,
}

struct ZoneEntry {
    zone: Zone,
    occupied: bool,
    changed_at: SystemTime,
}

/// Shared table of all zones across all cameras.
pub struct ZoneTable {
    inner: Mutex<HashMap<String, ZoneEntry>>,
}

impl ZoneTable {
    pub fn new(zones: Vec<Zone>) -> Self {
        let table = Self {
            inner: Mutex::new(HashMap::new()),
        };
        table.replace_all(zones);
        table
    }

    /// Swap in a new zone set, keeping occupancy for zones whose id survives
    /// and discarding state for removed zones.
    pub fn replace_all(&self, zones: Vec<Zone>) {
        let mut inner = self.inner.lock().expect("zone table lock poisoned");
        let mut next = HashMap::with_capacity(zones.len());
        for zone in zones {
            let (occupied, changed_at) = match inner.get(&zone.id) {
                Some(prev) => (prev.occupied, prev.changed_at),
                None => (false, SystemTime::now()),
            };
            next.insert(
                zone.id.clone(),
                ZoneEntry {
                    zone,
                    occupied,
                    changed_at,
                },
            );
        }
        *inner = next;
        log::info!("zone table updated: {} zones", inner.len());
    }

    /// Evaluate all of one camera's zones against a frame's detections.
    ///
    /// A zone is occupied iff at least one detection's foot point lies inside
    /// its polygon after projection into the polygon's reference space.
    /// Returns true when any zone changed state, so the caller can notify the
    /// relay controller without it polling every zone every frame.
    pub fn evaluate_camera(
        &self,
        camera_id: &str,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("zone table lock poisoned");
        let mut transitioned = false;
        for entry in inner.values_mut() {
            if entry.zone.camera_id != camera_id {
                continue;
            }
            let occupied = detections.iter().any(|det| {
                entry.zone.polygon.contains_projected(
                    det.foot_point(frame_width, frame_height),
                    frame_width,
                    frame_height,
                )
            });
            if occupied != entry.occupied {
                entry.occupied = occupied;
                entry.changed_at = now;
                transitioned = true;
                log::debug!(
                    "zone {} on camera {} -> {}",
                    entry.zone.id,
                    camera_id,
                    if occupied { "occupied" } else { "clear" }
                );
            }
        }
        transitioned
    }

    /// Force all of one camera's zones to unoccupied.
    ///
    /// Called when the camera enters an error state, disconnects, or its
    /// worker shuts down: a dead camera must never hold a stale occupied
    /// reading. The camera's own status entry carries the error so operators
    /// can tell "no data" from "confirmed empty".
    pub fn clear_camera(&self, camera_id: &str) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().expect("zone table lock poisoned");
        let mut transitioned = false;
        for entry in inner.values_mut() {
            if entry.zone.camera_id == camera_id && entry.occupied {
                entry.occupied = false;
                entry.changed_at = now;
                transitioned = true;
                log::debug!("zone {} cleared (camera {} down)", entry.zone.id, camera_id);
            }
        }
        transitioned
    }

    /// OR over all zones' current occupancy.
    pub fn any_occupied(&self) -> bool {
        let inner = self.inner.lock().expect("zone table lock poisoned");
        inner.values().any(|entry| entry.occupied)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("zone table lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("zone table lock poisoned").len()
    }

    /// Consistent point-in-time view of every zone, sorted by id.
    pub fn statuses(&self) -> Vec<ZoneStatus> {
        let inner = self.inner.lock().expect("zone table lock poisoned");
        let mut statuses: Vec<ZoneStatus> = inner
            .values()
            .map(|entry| ZoneStatus {
                id: entry.zone.id.clone(),
                camera_id: entry.zone.camera_id.clone(),
                name: entry.zone.name.clone(),
                occupied: entry.occupied,
                changed_at_epoch_s: epoch_s(entry.changed_at),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn person_at(x: f32, y: f32) -> Detection {
        // foot_point lands at (x + 0.05, y + 0.1) of the frame.
        Detection {
            x: x - 0.05,
            y: y - 0.1,
            w: 0.1,
            h: 0.1,
            confidence: 0.9,
        }
    }

    fn table_with_square_zone() -> ZoneTable {
        // Square covering the left half of a 640x480 reference frame.
        ZoneTable::new(vec![Zone {
            id: "loading_bay".to_string(),
            camera_id: "dock".to_string(),
            name: "Loading bay".to_string(),
            polygon: Polygon::new(
                vec![
                    Point::new(0.0, 0.0),
                    Point::new(320.0, 0.0),
                    Point::new(320.0, 480.0),
                    Point::new(0.0, 480.0),
                ],
                640,
                480,
            ),
        }])
    }

    #[test]
    fn no_detections_stays_unoccupied() {
        let table = table_with_square_zone();
        for _ in 0..5 {
            assert!(!table.evaluate_camera("dock", &[], 640, 480));
        }
        assert!(!table.any_occupied());
    }

    #[test]
    fn qualifying_detection_transitions_exactly_once() {
        let table = table_with_square_zone();
        let inside = person_at(0.25, 0.5);

        assert!(table.evaluate_camera("dock", &[inside], 640, 480));
        assert!(table.any_occupied());
        // Same occupancy again: no transition reported.
        assert!(!table.evaluate_camera("dock", &[inside], 640, 480));
        // Clearing reports one more transition.
        assert!(table.evaluate_camera("dock", &[], 640, 480));
        assert!(!table.any_occupied());
    }

    #[test]
    fn detection_outside_polygon_does_not_occupy() {
        let table = table_with_square_zone();
        let outside = person_at(0.75, 0.5);
        assert!(!table.evaluate_camera("dock", &[outside], 640, 480));
        assert!(!table.any_occupied());
    }

    #[test]
    fn live_frame_resolution_is_projected() {
        let table = table_with_square_zone();
        // Same relative position, different frame resolution.
        let inside = person_at(0.25, 0.5);
        assert!(table.evaluate_camera("dock", &[inside], 1920, 1080));
        assert!(table.any_occupied());
    }

    #[test]
    fn clear_camera_forces_unoccupied() {
        let table = table_with_square_zone();
        table.evaluate_camera("dock", &[person_at(0.25, 0.5)], 640, 480);
        assert!(table.any_occupied());

        assert!(table.clear_camera("dock"));
        assert!(!table.any_occupied());
        // Already clear: no further transition.
        assert!(!table.clear_camera("dock"));
    }

    #[test]
    fn other_cameras_zones_are_untouched() {
        let table = table_with_square_zone();
        assert!(!table.evaluate_camera("gate", &[person_at(0.25, 0.5)], 640, 480));
        assert!(!table.any_occupied());
    }

    #[test]
    fn replace_all_keeps_surviving_zone_state() {
        let table = table_with_square_zone();
        table.evaluate_camera("dock", &[person_at(0.25, 0.5)], 640, 480);
        assert!(table.any_occupied());

        let statuses = table.statuses();
        let keep = statuses[0].clone();

        // Re-apply the same definition plus nothing else: occupancy survives.
        let zone = Zone {
            id: keep.id.clone(),
            camera_id: keep.camera_id.clone(),
            name: keep.name.clone(),
            polygon: Polygon::new(
                vec![
                    Point::new(0.0, 0.0),
                    Point::new(320.0, 0.0),
                    Point::new(320.0, 480.0),
                ],
                640,
                480,
            ),
        };
        table.replace_all(vec![zone]);
        assert!(table.any_occupied());

        // Removing the zone discards its state entirely.
        table.replace_all(Vec::new());
        assert!(table.is_empty());
        assert!(!table.any_occupied());
    }
}
