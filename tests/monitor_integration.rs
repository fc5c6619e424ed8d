//! End-to-end engine tests: scripted detections flowing through workers,
//! the zone table, the relay controller, and status snapshots, with no
//! hardware anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Sender};

use zoneguard::config::{CameraConfig, GpioConfig, MonitorConfig, ZoneConfig};
use zoneguard::detect::{Detection, Detector, ScriptedDetector};
use zoneguard::geometry::Point;
use zoneguard::ingest::{FrameSource, RtspConfig, RtspSource};
use zoneguard::relay::RelayOutput;
use zoneguard::status::{StatusSink, StatusSnapshot};
use zoneguard::worker::{DetectorFactory, SourceFactory};
use zoneguard::ZoneMonitor;

const POLL: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(10);

/// Relay output that records every physical level written.
#[derive(Clone, Default)]
struct RecordingRelay {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl RelayOutput for RecordingRelay {
    fn apply(&mut self, level: bool) -> Result<()> {
        self.writes.lock().unwrap().push(level);
        Ok(())
    }
}

/// Sink that forwards snapshots to a channel.
struct ChannelSink(Sender<StatusSnapshot>);

impl StatusSink for ChannelSink {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        let _ = self.0.send(snapshot.clone());
    }
}

fn person() -> Detection {
    // Foot point at (0.5, 0.75) of the frame.
    Detection {
        x: 0.4,
        y: 0.25,
        w: 0.2,
        h: 0.5,
        confidence: 0.9,
    }
}

fn camera(id: &str) -> CameraConfig {
    CameraConfig {
        id: id.to_string(),
        name: id.to_string(),
        source: format!("stub://{}", id),
        target_fps: 50,
    }
}

fn full_frame_zone(id: &str, camera_id: &str) -> ZoneConfig {
    ZoneConfig {
        id: id.to_string(),
        camera_id: camera_id.to_string(),
        name: id.to_string(),
        points: vec![
            Point::new(0.0, 0.0),
            Point::new(640.0, 0.0),
            Point::new(640.0, 480.0),
            Point::new(0.0, 480.0),
        ],
        reference_width: 640,
        reference_height: 480,
    }
}

/// Triangle over the lower-center of the frame; contains the scripted
/// person's foot point at (320, 360).
fn triangle_zone(id: &str, camera_id: &str) -> ZoneConfig {
    ZoneConfig {
        id: id.to_string(),
        camera_id: camera_id.to_string(),
        name: id.to_string(),
        points: vec![
            Point::new(320.0, 100.0),
            Point::new(640.0, 480.0),
            Point::new(0.0, 480.0),
        ],
        reference_width: 640,
        reference_height: 480,
    }
}

fn test_config(
    cameras: Vec<CameraConfig>,
    zones: Vec<ZoneConfig>,
    delay_secs: f64,
) -> MonitorConfig {
    let cfg = MonitorConfig {
        cameras,
        zones,
        gpio: GpioConfig {
            output_pin: 17,
            active_high: true,
            deactivation_delay_secs: delay_secs,
        },
        status_interval_secs: 0.2,
        relay_tick_ms: 20,
        ..Default::default()
    };
    cfg.validate().expect("test config must be valid");
    cfg
}

fn stub_sources() -> Arc<SourceFactory> {
    Arc::new(|camera| {
        let source = RtspSource::new(RtspConfig {
            url: camera.source.clone(),
            target_fps: camera.target_fps,
            width: 64,
            height: 48,
        })?;
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}

/// Detector factory serving a fixed per-camera script. Once a camera's
/// script is exhausted every further frame reads as empty.
fn scripted_detectors(scripts: HashMap<String, Vec<Vec<Detection>>>) -> Arc<DetectorFactory> {
    Arc::new(move |camera| {
        let script = scripts.get(&camera.id).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedDetector::new(script)) as Box<dyn Detector>)
    })
}

fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = Instant::now() + DEADLINE;
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(POLL);
    }
}

#[test]
fn occupancy_drives_the_relay_through_a_full_cycle() {
    let relay = RecordingRelay::default();
    let (sink_tx, sink_rx) = unbounded();

    // A few empty frames, one second of presence, then empty forever.
    let mut scripts = HashMap::new();
    let mut script: Vec<Vec<Detection>> = vec![Vec::new(); 3];
    script.extend(std::iter::repeat(vec![person()]).take(50));
    scripts.insert("dock".to_string(), script);

    let config = test_config(
        vec![camera("dock")],
        vec![triangle_zone("bay_1", "dock")],
        0.3,
    );
    let monitor = ZoneMonitor::start(
        &config,
        Box::new(relay.clone()),
        Box::new(ChannelSink(sink_tx)),
        stub_sources(),
        scripted_detectors(scripts),
    )
    .expect("start monitor");

    wait_for(|| monitor.snapshot().relay.active, "relay activation");
    {
        let snapshot = monitor.snapshot();
        assert!(snapshot.zones.iter().any(|zone| zone.occupied));
    }

    // Script runs out, the zone clears, and the delay expires.
    wait_for(|| !monitor.snapshot().relay.active, "relay deactivation");
    {
        let snapshot = monitor.snapshot();
        assert!(snapshot.zones.iter().all(|zone| !zone.occupied));
    }

    // The publisher keeps emitting snapshots on its interval.
    sink_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("periodic snapshot");
    sink_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("second periodic snapshot");

    monitor.shutdown();

    // Physical writes: initial inactive, one activation, one deactivation.
    let writes = relay.writes.lock().unwrap().clone();
    assert_eq!(writes, vec![false, true, false]);
}

#[test]
fn relay_follows_the_or_over_all_cameras() {
    let relay = RecordingRelay::default();
    let (sink_tx, _sink_rx) = unbounded();

    // Camera "dock" is occupied briefly; camera "gate" much longer. The
    // relay must hold while either zone is occupied.
    let mut scripts = HashMap::new();
    scripts.insert(
        "dock".to_string(),
        std::iter::repeat(vec![person()]).take(15).collect(),
    );
    scripts.insert(
        "gate".to_string(),
        std::iter::repeat(vec![person()]).take(150).collect(),
    );

    let config = test_config(
        vec![camera("dock"), camera("gate")],
        vec![
            full_frame_zone("bay_1", "dock"),
            full_frame_zone("gate_area", "gate"),
        ],
        0.2,
    );
    let monitor = ZoneMonitor::start(
        &config,
        Box::new(relay.clone()),
        Box::new(ChannelSink(sink_tx)),
        stub_sources(),
        scripted_detectors(scripts),
    )
    .expect("start monitor");

    wait_for(|| monitor.snapshot().relay.active, "relay activation");

    // Wait until the dock zone has cleared while the gate zone holds.
    wait_for(
        || {
            let snapshot = monitor.snapshot();
            let dock = snapshot.zones.iter().find(|z| z.id == "bay_1");
            let gate = snapshot.zones.iter().find(|z| z.id == "gate_area");
            matches!((dock, gate), (Some(d), Some(g)) if !d.occupied && g.occupied)
        },
        "dock clear while gate occupied",
    );
    assert!(monitor.snapshot().relay.active, "relay must hold on the OR");

    wait_for(|| !monitor.snapshot().relay.active, "relay deactivation");
    monitor.shutdown();

    // Exactly one activation edge despite two zones coming and going.
    let writes = relay.writes.lock().unwrap().clone();
    assert_eq!(writes, vec![false, true, false]);
}

#[test]
fn camera_failure_clears_its_zones_and_releases_the_relay() {
    /// Source that serves a handful of frames and then dies; reconnect
    /// attempts fail outright.
    struct DyingSource {
        inner: RtspSource,
        remaining: u32,
    }

    impl FrameSource for DyingSource {
        fn connect(&mut self) -> Result<()> {
            self.inner.connect()
        }

        fn next_frame(&mut self) -> Result<zoneguard::frame::Frame> {
            if self.remaining == 0 {
                return Err(anyhow!("stream lost"));
            }
            self.remaining -= 1;
            self.inner.next_frame()
        }

        fn stop(&mut self) {
            self.inner.stop()
        }

        fn is_healthy(&self) -> bool {
            self.remaining > 0 && self.inner.is_healthy()
        }

        fn stats(&self) -> zoneguard::ingest::SourceStats {
            self.inner.stats()
        }
    }

    let relay = RecordingRelay::default();
    let (sink_tx, _sink_rx) = unbounded();

    let attempts = Arc::new(AtomicU32::new(0));
    let factory_attempts = attempts.clone();
    let sources: Arc<SourceFactory> = Arc::new(move |camera| {
        if factory_attempts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(anyhow!("camera unreachable"));
        }
        let inner = RtspSource::new(RtspConfig {
            url: camera.source.clone(),
            target_fps: camera.target_fps,
            width: 64,
            height: 48,
        })?;
        Ok(Box::new(DyingSource {
            inner,
            remaining: 10,
        }) as Box<dyn FrameSource>)
    });

    // Person on every frame: only the camera failure can clear the zone.
    let mut scripts = HashMap::new();
    scripts.insert(
        "dock".to_string(),
        std::iter::repeat(vec![person()]).take(1000).collect(),
    );

    let config = test_config(
        vec![camera("dock")],
        vec![full_frame_zone("bay_1", "dock")],
        0.1,
    );
    let monitor = ZoneMonitor::start(
        &config,
        Box::new(relay.clone()),
        Box::new(ChannelSink(sink_tx)),
        sources,
        scripted_detectors(scripts),
    )
    .expect("start monitor");

    wait_for(|| monitor.snapshot().relay.active, "relay activation");

    // The stream dies mid-occupancy: zones force-clear, the delay runs out,
    // and the camera surfaces an error instead of "confirmed empty".
    wait_for(|| !monitor.snapshot().relay.active, "relay release after failure");
    let snapshot = monitor.snapshot();
    assert!(snapshot.zones.iter().all(|zone| !zone.occupied));
    let camera_json = serde_json::to_value(&snapshot.cameras[0]).unwrap();
    assert_eq!(camera_json["state"], "error");

    monitor.shutdown();
}

#[test]
fn shutdown_always_leaves_the_relay_inactive() {
    let relay = RecordingRelay::default();
    let (sink_tx, _sink_rx) = unbounded();

    // Occupied for the whole test, with a long deactivation delay: only
    // shutdown can release the relay.
    let mut scripts = HashMap::new();
    scripts.insert(
        "dock".to_string(),
        std::iter::repeat(vec![person()]).take(10_000).collect(),
    );

    let config = test_config(
        vec![camera("dock")],
        vec![full_frame_zone("bay_1", "dock")],
        60.0,
    );
    let monitor = ZoneMonitor::start(
        &config,
        Box::new(relay.clone()),
        Box::new(ChannelSink(sink_tx)),
        stub_sources(),
        scripted_detectors(scripts),
    )
    .expect("start monitor");

    wait_for(|| monitor.snapshot().relay.active, "relay activation");
    monitor.shutdown();

    let writes = relay.writes.lock().unwrap().clone();
    assert_eq!(
        writes.last(),
        Some(&false),
        "relay must be physically inactive after shutdown"
    );
}
