//! The zone monitor.
//!
//! `ZoneMonitor` wires everything together: it owns one worker per camera,
//! a relay thread that is the only writer of the relay output, and a status
//! thread that publishes snapshots. Workers push `ZoneActivity` events when
//! any zone flips; the relay thread also wakes on a periodic tick so a
//! pending deactivation delay expires even when no transitions arrive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

use crate::config::{GpioConfig, MonitorConfig};
use crate::epoch_s;
use crate::relay::{RelayController, RelayOutput, RelayStatus};
use crate::status::{StatusSink, StatusSnapshot};
use crate::worker::{spawn_camera_worker, CameraTable, DetectorFactory, SourceFactory, WorkerHandle};
use crate::zone::ZoneTable;

/// Events consumed by the relay thread.
pub enum MonitorEvent {
    /// Some zone changed occupancy; re-evaluate the aggregate.
    ZoneActivity,
    /// Runtime GPIO reconfiguration.
    GpioConfigChanged(GpioConfig),
    /// Stop the relay thread.
    Shutdown,
}

/// The running engine.
pub struct ZoneMonitor {
    zones: Arc<ZoneTable>,
    cameras: Arc<CameraTable>,
    workers: HashMap<String, WorkerHandle>,
    events: Sender<MonitorEvent>,
    relay_status: Arc<Mutex<RelayStatus>>,
    relay_thread: Option<JoinHandle<()>>,
    status_thread: Option<JoinHandle<()>>,
    status_shutdown: Arc<AtomicBool>,
    status_wake: Sender<()>,
    sources: Arc<SourceFactory>,
    detectors: Arc<DetectorFactory>,
}

impl ZoneMonitor {
    /// Start the engine: relay thread, status thread, one worker per camera.
    ///
    /// The relay output is driven to its inactive level before any worker
    /// starts, so the observable relay state is well defined from the first
    /// instant.
    pub fn start(
        config: &MonitorConfig,
        relay_output: Box<dyn RelayOutput>,
        sink: Box<dyn StatusSink>,
        sources: Arc<SourceFactory>,
        detectors: Arc<DetectorFactory>,
    ) -> Result<Self> {
        let zones = Arc::new(ZoneTable::new(config.zone_definitions()));
        let cameras = Arc::new(CameraTable::new());
        let (events_tx, events_rx) = unbounded();
        // Capacity 1: an edge only needs to wake the publisher once.
        let (wake_tx, wake_rx) = bounded(1);

        let controller = RelayController::new(config.gpio.clone(), relay_output)?;
        let relay_status = Arc::new(Mutex::new(controller.status()));

        if config.cameras.is_empty() {
            log::warn!("no cameras configured; the relay will never activate");
        }

        let relay_thread = {
            let zones = zones.clone();
            let relay_status = relay_status.clone();
            let wake_tx = wake_tx.clone();
            let tick = config.relay_tick();
            std::thread::Builder::new()
                .name("relay".to_string())
                .spawn(move || {
                    run_relay_loop(controller, events_rx, zones, relay_status, wake_tx, tick);
                })
                .expect("spawn relay thread")
        };

        let status_shutdown = Arc::new(AtomicBool::new(false));
        let status_thread = {
            let zones = zones.clone();
            let cameras = cameras.clone();
            let relay_status = relay_status.clone();
            let shutdown = status_shutdown.clone();
            let interval = config.status_interval();
            let mut sink = sink;
            std::thread::Builder::new()
                .name("status".to_string())
                .spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) {
                        let snapshot = assemble_snapshot(&zones, &cameras, &relay_status);
                        sink.publish(&snapshot);
                        match wake_rx.recv_timeout(interval) {
                            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .expect("spawn status thread")
        };

        let mut monitor = Self {
            zones,
            cameras,
            workers: HashMap::new(),
            events: events_tx,
            relay_status,
            relay_thread: Some(relay_thread),
            status_thread: Some(status_thread),
            status_shutdown,
            status_wake: wake_tx,
            sources,
            detectors,
        };
        for camera in &config.cameras {
            monitor.spawn_worker(camera.clone());
        }
        Ok(monitor)
    }

    fn spawn_worker(&mut self, camera: crate::config::CameraConfig) {
        let id = camera.id.clone();
        let handle = spawn_camera_worker(
            camera,
            self.zones.clone(),
            self.cameras.clone(),
            self.events.clone(),
            self.sources.clone(),
            self.detectors.clone(),
        );
        self.workers.insert(id, handle);
    }

    /// Apply a new configuration to the running engine.
    ///
    /// Zones are swapped wholesale (occupancy survives for unchanged ids).
    /// Camera workers are reconciled: removed cameras are stopped, new ones
    /// started, and a camera whose source or sample rate changed is
    /// restarted. Untouched cameras keep streaming. The caller is expected
    /// to hand over an already validated configuration.
    pub fn apply_config(&mut self, config: &MonitorConfig) {
        self.zones.replace_all(config.zone_definitions());

        let desired: HashMap<&str, &crate::config::CameraConfig> = config
            .cameras
            .iter()
            .map(|camera| (camera.id.as_str(), camera))
            .collect();

        let current_ids: HashSet<String> = self.workers.keys().cloned().collect();
        for id in &current_ids {
            let unchanged = desired.get(id.as_str()).filter(|camera| {
                let running = self.workers[id].config();
                running.source == camera.source && running.target_fps == camera.target_fps
            });
            match unchanged {
                Some(camera) => {
                    // Display-name changes don't warrant a restart, but
                    // status snapshots must reflect them right away.
                    self.cameras.set_name(id, &camera.name);
                }
                None => {
                    if let Some(handle) = self.workers.remove(id) {
                        log::info!("stopping camera worker '{}' (reconfigured or removed)", id);
                        handle.stop();
                    }
                    self.cameras.remove(id);
                }
            }
        }

        for camera in &config.cameras {
            if !self.workers.contains_key(&camera.id) {
                log::info!("starting camera worker '{}'", camera.id);
                self.spawn_worker(camera.clone());
            }
        }

        let _ = self
            .events
            .send(MonitorEvent::GpioConfigChanged(config.gpio.clone()));
        // Zone geometry may have changed under current occupancy.
        let _ = self.events.send(MonitorEvent::ZoneActivity);
        let _ = self.status_wake.try_send(());
    }

    /// Current engine state, assembled on demand.
    pub fn snapshot(&self) -> StatusSnapshot {
        assemble_snapshot(&self.zones, &self.cameras, &self.relay_status)
    }

    pub fn camera_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop workers, release the relay, and join every thread.
    ///
    /// Worker shutdown comes first so the relay thread sees final zone
    /// clears before it releases the output.
    pub fn shutdown(mut self) {
        log::info!("zone monitor shutting down");
        for (_, handle) in self.workers.drain() {
            handle.stop();
        }

        let _ = self.events.send(MonitorEvent::Shutdown);
        if let Some(join) = self.relay_thread.take() {
            if join.join().is_err() {
                log::error!("relay thread panicked");
            }
        }

        self.status_shutdown.store(true, Ordering::SeqCst);
        let _ = self.status_wake.try_send(());
        if let Some(join) = self.status_thread.take() {
            if join.join().is_err() {
                log::error!("status thread panicked");
            }
        }
        log::info!("zone monitor stopped");
    }
}

fn run_relay_loop(
    mut controller: RelayController,
    events: crossbeam_channel::Receiver<MonitorEvent>,
    zones: Arc<ZoneTable>,
    relay_status: Arc<Mutex<RelayStatus>>,
    wake: Sender<()>,
    tick: Duration,
) {
    let mut warned_no_zones = false;
    loop {
        let event = events.recv_timeout(tick);
        match event {
            Ok(MonitorEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(MonitorEvent::GpioConfigChanged(gpio)) => {
                if let Err(e) = controller.apply_config(gpio) {
                    log::error!("failed to apply gpio config: {:#}", e);
                }
                publish_relay_status(&controller, &relay_status);
                let _ = wake.try_send(());
                continue;
            }
            Ok(MonitorEvent::ZoneActivity) | Err(RecvTimeoutError::Timeout) => {}
        }

        if zones.is_empty() {
            if !warned_no_zones {
                log::warn!("no zones configured; nothing can occupy the relay");
                warned_no_zones = true;
            }
        } else {
            warned_no_zones = false;
        }

        match controller.update(zones.any_occupied()) {
            Ok(Some(_edge)) => {
                publish_relay_status(&controller, &relay_status);
                let _ = wake.try_send(());
            }
            Ok(None) => {}
            // Keep the logical state machine running even when the physical
            // write fails; the next edge retries the output.
            Err(e) => log::error!("relay output write failed: {:#}", e),
        }
    }

    match controller.release() {
        Ok(_) => publish_relay_status(&controller, &relay_status),
        Err(e) => log::error!("failed to release relay on shutdown: {:#}", e),
    }
    let _ = wake.try_send(());
}

fn publish_relay_status(controller: &RelayController, cell: &Arc<Mutex<RelayStatus>>) {
    let mut cell = cell.lock().expect("relay status lock poisoned");
    *cell = controller.status();
}

fn assemble_snapshot(
    zones: &Arc<ZoneTable>,
    cameras: &Arc<CameraTable>,
    relay_status: &Arc<Mutex<RelayStatus>>,
) -> StatusSnapshot {
    let relay = relay_status
        .lock()
        .expect("relay status lock poisoned")
        .clone();
    StatusSnapshot {
        generated_at_epoch_s: epoch_s(SystemTime::now()),
        cameras: cameras.statuses(),
        zones: zones.statuses(),
        relay,
    }
}
