//! Camera workers.
//!
//! One OS thread per configured camera, alive for the camera's entire
//! lifetime in the process. The worker drives its frame source through
//! `Disconnected -> Connecting -> Streaming`, falls into `Error` on any
//! acquisition or inference failure, and climbs back out through a capped
//! exponential backoff. A worker that is not streaming forces its zones to
//! unoccupied before anything else, so the relay controller never acts on a
//! reading from a dead camera.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use crossbeam_channel::Sender;
use serde::Serialize;

use crate::config::CameraConfig;
use crate::detect::Detector;
use crate::epoch_s;
use crate::ingest::FrameSource;
use crate::monitor::MonitorEvent;
use crate::zone::ZoneTable;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Granularity of interruptible sleeps; bounds shutdown latency.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Builds a frame source for a camera. Injected so tests and the daemon can
/// choose acquisition backends without the worker knowing about them.
pub type SourceFactory = dyn Fn(&CameraConfig) -> Result<Box<dyn FrameSource>> + Send + Sync;

/// Builds a detector for a camera.
pub type DetectorFactory = dyn Fn(&CameraConfig) -> Result<Box<dyn Detector>> + Send + Sync;

/// Connection state of one camera.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Error(String),
}

/// Read-only view of one camera, for status snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub id: String,
    pub name: String,
    pub source: String,
    #[serde(flatten)]
    pub connection: ConnectionState,
    pub frames_captured: u64,
    pub last_frame_epoch_s: Option<u64>,
    pub connection_attempts: u32,
}

struct CameraEntry {
    name: String,
    source: String,
    connection: ConnectionState,
    frames_captured: u64,
    last_frame_at: Option<SystemTime>,
    connection_attempts: u32,
}

/// Shared table of camera connection state, written by workers and read by
/// the status publisher.
pub struct CameraTable {
    inner: Mutex<HashMap<String, CameraEntry>>,
}

impl CameraTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, config: &CameraConfig) {
        let mut inner = self.inner.lock().expect("camera table lock poisoned");
        inner.insert(
            config.id.clone(),
            CameraEntry {
                name: config.name.clone(),
                source: config.source.clone(),
                connection: ConnectionState::Disconnected,
                frames_captured: 0,
                last_frame_at: None,
                connection_attempts: 0,
            },
        );
    }

    pub fn remove(&self, camera_id: &str) {
        let mut inner = self.inner.lock().expect("camera table lock poisoned");
        inner.remove(camera_id);
    }

    pub fn set_connection(&self, camera_id: &str, connection: ConnectionState) {
        let mut inner = self.inner.lock().expect("camera table lock poisoned");
        if let Some(entry) = inner.get_mut(camera_id) {
            if matches!(connection, ConnectionState::Connecting) {
                entry.connection_attempts += 1;
            }
            entry.connection = connection;
        }
    }

    /// Refresh the display name of a camera whose worker keeps running.
    pub fn set_name(&self, camera_id: &str, name: &str) {
        let mut inner = self.inner.lock().expect("camera table lock poisoned");
        if let Some(entry) = inner.get_mut(camera_id) {
            if entry.name != name {
                entry.name = name.to_string();
            }
        }
    }

    pub fn record_frame(&self, camera_id: &str) {
        let mut inner = self.inner.lock().expect("camera table lock poisoned");
        if let Some(entry) = inner.get_mut(camera_id) {
            entry.frames_captured += 1;
            entry.last_frame_at = Some(SystemTime::now());
        }
    }

    pub fn connection(&self, camera_id: &str) -> Option<ConnectionState> {
        let inner = self.inner.lock().expect("camera table lock poisoned");
        inner.get(camera_id).map(|entry| entry.connection.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("camera table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent point-in-time view of every camera, sorted by id.
    pub fn statuses(&self) -> Vec<CameraStatus> {
        let inner = self.inner.lock().expect("camera table lock poisoned");
        let mut statuses: Vec<CameraStatus> = inner
            .iter()
            .map(|(id, entry)| CameraStatus {
                id: id.clone(),
                name: entry.name.clone(),
                source: entry.source.clone(),
                connection: entry.connection.clone(),
                frames_captured: entry.frames_captured,
                last_frame_epoch_s: entry.last_frame_at.map(epoch_s),
                connection_attempts: entry.connection_attempts,
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

impl Default for CameraTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running camera worker.
pub struct WorkerHandle {
    config: CameraConfig,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Stop the worker and wait for it to exit. The worker clears its zones
    /// and releases its source before returning.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("camera worker '{}' panicked", self.config.id);
            }
        }
    }
}

/// Spawn the worker thread for one camera.
pub fn spawn_camera_worker(
    config: CameraConfig,
    zones: Arc<ZoneTable>,
    cameras: Arc<CameraTable>,
    events: Sender<MonitorEvent>,
    sources: Arc<SourceFactory>,
    detectors: Arc<DetectorFactory>,
) -> WorkerHandle {
    cameras.insert(&config);
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = shutdown.clone();
    let thread_config = config.clone();
    let join = std::thread::Builder::new()
        .name(format!("camera-{}", config.id))
        .spawn(move || {
            let mut worker = CameraWorker {
                config: thread_config,
                zones,
                cameras,
                events,
                sources,
                detectors,
                shutdown: thread_shutdown,
                backoff: INITIAL_BACKOFF,
            };
            worker.run();
        })
        .expect("spawn camera worker thread");

    WorkerHandle {
        config,
        shutdown,
        join: Some(join),
    }
}

struct CameraWorker {
    config: CameraConfig,
    zones: Arc<ZoneTable>,
    cameras: Arc<CameraTable>,
    events: Sender<MonitorEvent>,
    sources: Arc<SourceFactory>,
    detectors: Arc<DetectorFactory>,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
}

impl CameraWorker {
    fn run(&mut self) {
        log::info!(
            "camera worker '{}' started ({})",
            self.config.id,
            self.config.source
        );

        while !self.stopping() {
            match self.connect_and_stream() {
                Ok(()) => break, // clean shutdown requested while streaming
                Err(e) => {
                    self.enter_error(&e);
                    self.sleep_backoff();
                }
            }
        }

        // Never leave stale occupancy behind on exit.
        if self.zones.clear_camera(&self.config.id) {
            let _ = self.events.send(MonitorEvent::ZoneActivity);
        }
        self.cameras
            .set_connection(&self.config.id, ConnectionState::Disconnected);
        log::info!("camera worker '{}' stopped", self.config.id);
    }

    /// One connection cycle: build the source and detector, then stream
    /// frames until shutdown or a failure.
    fn connect_and_stream(&mut self) -> Result<()> {
        self.cameras
            .set_connection(&self.config.id, ConnectionState::Connecting);

        let mut source = (self.sources)(&self.config)?;
        if let Err(e) = source.connect() {
            source.stop();
            return Err(e);
        }

        let mut detector = match (self.detectors)(&self.config) {
            Ok(detector) => detector,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };
        if let Err(e) = detector.warm_up() {
            source.stop();
            return Err(e);
        }

        self.cameras
            .set_connection(&self.config.id, ConnectionState::Streaming);
        self.backoff = INITIAL_BACKOFF;
        log::info!(
            "camera '{}' streaming via {} / {}",
            self.config.id,
            source.stats().source,
            detector.name()
        );

        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64);
        while !self.stopping() {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    source.stop();
                    return Err(e);
                }
            };
            self.cameras.record_frame(&self.config.id);

            let detections = match detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    source.stop();
                    return Err(e);
                }
            };

            let transitioned = self.zones.evaluate_camera(
                &self.config.id,
                &detections,
                frame.width,
                frame.height,
            );
            if transitioned {
                let _ = self.events.send(MonitorEvent::ZoneActivity);
            }

            // Throttle to the configured sample rate.
            self.sleep(interval);
        }

        source.stop();
        Ok(())
    }

    fn enter_error(&mut self, error: &anyhow::Error) {
        log::warn!("camera '{}' failed: {:#}", self.config.id, error);
        self.cameras.set_connection(
            &self.config.id,
            ConnectionState::Error(format!("{:#}", error)),
        );
        if self.zones.clear_camera(&self.config.id) {
            let _ = self.events.send(MonitorEvent::ZoneActivity);
        }
    }

    fn sleep_backoff(&mut self) {
        let backoff = self.backoff;
        log::debug!(
            "camera '{}' backing off for {:.1}s",
            self.config.id,
            backoff.as_secs_f64()
        );
        self.sleep(backoff);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in small slices so a shutdown request is honored promptly.
    fn sleep(&self, total: Duration) {
        let mut remaining = total;
        while !self.stopping() && remaining > Duration::ZERO {
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, ScriptedDetector};
    use crate::frame::Frame;
    use crate::geometry::{Point, Polygon};
    use crate::ingest::SourceStats;
    use crate::zone::Zone;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicU32;

    /// Source that produces a few frames and then fails every read.
    struct FailingSource {
        frames_before_failure: u32,
        served: Arc<AtomicU32>,
    }

    impl FrameSource for FailingSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            let served = self.served.fetch_add(1, Ordering::SeqCst);
            if served < self.frames_before_failure {
                Frame::new(vec![0u8; 8 * 8 * 3], 8, 8)
            } else {
                Err(anyhow::anyhow!("stream lost"))
            }
        }

        fn stop(&mut self) {}

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.served.load(Ordering::SeqCst) as u64,
                source: "test://failing".to_string(),
            }
        }
    }

    fn full_frame_zone(camera_id: &str) -> Zone {
        Zone {
            id: format!("{}_zone", camera_id),
            camera_id: camera_id.to_string(),
            name: "test zone".to_string(),
            polygon: Polygon::new(
                vec![
                    Point::new(0.0, 0.0),
                    Point::new(640.0, 0.0),
                    Point::new(640.0, 480.0),
                    Point::new(0.0, 480.0),
                ],
                640,
                480,
            ),
        }
    }

    fn centered_person() -> Detection {
        Detection {
            x: 0.4,
            y: 0.25,
            w: 0.2,
            h: 0.5,
            confidence: 0.9,
        }
    }

    fn camera_config(id: &str) -> CameraConfig {
        CameraConfig {
            id: id.to_string(),
            name: id.to_string(),
            source: "test://failing".to_string(),
            target_fps: 100,
        }
    }

    #[test]
    fn failure_clears_zones_and_surfaces_error_state() {
        let zones = Arc::new(ZoneTable::new(vec![full_frame_zone("dock")]));
        let cameras = Arc::new(CameraTable::new());
        let (events_tx, events_rx) = unbounded();

        let served = Arc::new(AtomicU32::new(0));
        let served_for_source = served.clone();
        let sources: Arc<SourceFactory> = Arc::new(move |_cfg| {
            Ok(Box::new(FailingSource {
                frames_before_failure: 2,
                served: served_for_source.clone(),
            }) as Box<dyn FrameSource>)
        });
        // First frame occupies the zone, second clears nothing (still
        // occupied), then the source dies while the zone is occupied.
        let detectors: Arc<DetectorFactory> = Arc::new(|_cfg| {
            Ok(Box::new(ScriptedDetector::new(vec![
                vec![centered_person()],
                vec![centered_person()],
            ])) as Box<dyn Detector>)
        });

        let handle = spawn_camera_worker(
            camera_config("dock"),
            zones.clone(),
            cameras.clone(),
            events_tx,
            sources,
            detectors,
        );

        // Occupancy event from the first frame.
        events_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("occupancy event");
        assert!(zones.any_occupied());

        // The failure must clear the zone and emit another event.
        events_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("clear event after failure");
        assert!(!zones.any_occupied());

        // Camera-level error is surfaced, distinct from "confirmed empty".
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match cameras.connection("dock") {
                Some(ConnectionState::Error(_)) => break,
                _ if std::time::Instant::now() > deadline => panic!("camera never entered Error"),
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }

        handle.stop();
        assert_eq!(
            cameras.connection("dock"),
            Some(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn stop_forces_zones_unoccupied() {
        let zones = Arc::new(ZoneTable::new(vec![full_frame_zone("dock")]));
        let cameras = Arc::new(CameraTable::new());
        let (events_tx, events_rx) = unbounded();

        let sources: Arc<SourceFactory> = Arc::new(|cfg| {
            Ok(Box::new(crate::ingest::RtspSource::new(
                crate::ingest::RtspConfig {
                    url: cfg.source.clone(),
                    target_fps: cfg.target_fps,
                    width: 64,
                    height: 48,
                },
            )?) as Box<dyn FrameSource>)
        });
        // Occupy on every frame so the zone is held occupied until shutdown.
        let detectors: Arc<DetectorFactory> = Arc::new(|_cfg| {
            Ok(Box::new(ScriptedDetector::new(
                std::iter::repeat(vec![centered_person()]).take(10_000),
            )) as Box<dyn Detector>)
        });

        let mut config = camera_config("dock");
        config.source = "stub://dock".to_string();
        let handle = spawn_camera_worker(
            config,
            zones.clone(),
            cameras.clone(),
            events_tx,
            sources,
            detectors,
        );

        events_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("occupancy event");
        assert!(zones.any_occupied());

        handle.stop();
        assert!(!zones.any_occupied());
        assert_eq!(
            cameras.connection("dock"),
            Some(ConnectionState::Disconnected)
        );
    }
}
