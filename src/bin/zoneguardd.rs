//! zoneguardd: the zone presence daemon.
//!
//! Loads the JSON configuration (writing a default one on first run), starts
//! the monitor, and keeps running until SIGINT/SIGTERM. The configuration
//! file is watched by modification time and re-applied live; a bad reload is
//! logged and the previous configuration stays in effect.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use zoneguard::config::{CameraConfig, DetectorSettings, MonitorConfig, DEFAULT_CONFIG_PATH};
use zoneguard::detect::{Detector, MotionStubDetector, SimulatedDetector};
#[cfg(feature = "backend-tract")]
use zoneguard::detect::YoloPersonDetector;
use zoneguard::ingest::{FrameSource, RtspConfig, RtspSource};
use zoneguard::monitor::ZoneMonitor;
use zoneguard::relay::{RelayOutput, SimulatedRelay};
use zoneguard::status::LogSink;
use zoneguard::worker::{DetectorFactory, SourceFactory};

/// Frame resolution requested from sources; also the inference input size.
const SOURCE_WIDTH: u32 = 640;
const SOURCE_HEIGHT: u32 = 480;

#[derive(Parser, Debug)]
#[command(
    name = "zoneguardd",
    about = "Zone presence engine: camera zones driving a safety relay",
    version
)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "ZONEGUARD_CONFIG")]
    config: PathBuf,

    /// Run without hardware: simulated relay output and simulated detections.
    #[arg(long)]
    simulate: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        log::error!("zoneguardd failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = MonitorConfig::load_or_default(&args.config)?;
    if args.simulate {
        config.detector.backend = "simulated".to_string();
    }
    log::info!(
        "zoneguardd starting: {} cameras, {} zones, detector '{}', gpio pin {}",
        config.cameras.len(),
        config.zones.len(),
        config.detector.backend,
        config.gpio.output_pin
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let relay_output = open_relay(&config, args.simulate);

    // Detector settings live behind a lock so a reload reaches workers that
    // reconnect afterwards.
    let detector_settings = Arc::new(Mutex::new(config.detector.clone()));
    let factory_settings = detector_settings.clone();
    let detectors: Arc<DetectorFactory> = Arc::new(move |camera| {
        let settings = factory_settings
            .lock()
            .map_err(|_| anyhow!("detector settings lock poisoned"))?
            .clone();
        build_detector(&settings, camera)
    });

    let sources: Arc<SourceFactory> = Arc::new(|camera| {
        let source = RtspSource::new(RtspConfig {
            url: camera.source.clone(),
            target_fps: camera.target_fps,
            width: SOURCE_WIDTH,
            height: SOURCE_HEIGHT,
        })?;
        Ok(Box::new(source) as Box<dyn FrameSource>)
    });

    let mut monitor = ZoneMonitor::start(
        &config,
        relay_output,
        Box::new(LogSink),
        sources,
        detectors,
    )?;

    let mut last_modified = modified_time(&args.config);
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));

        let current = modified_time(&args.config);
        if current == last_modified {
            continue;
        }
        last_modified = current;
        match MonitorConfig::load(&args.config) {
            Ok(mut reloaded) => {
                if args.simulate {
                    reloaded.detector.backend = "simulated".to_string();
                }
                if let Ok(mut settings) = detector_settings.lock() {
                    *settings = reloaded.detector.clone();
                }
                monitor.apply_config(&reloaded);
                log::info!("configuration reloaded from {}", args.config.display());
            }
            Err(e) => {
                log::error!("config reload failed, keeping previous configuration: {:#}", e);
            }
        }
    }

    monitor.shutdown();
    Ok(())
}

/// Open the physical relay, falling back to the simulated one when the GPIO
/// interface is unavailable so development machines still run end to end.
fn open_relay(config: &MonitorConfig, simulate: bool) -> Box<dyn RelayOutput> {
    if simulate {
        log::info!("relay: simulated (--simulate)");
        return Box::new(SimulatedRelay);
    }

    #[cfg(target_os = "linux")]
    {
        match zoneguard::relay::SysfsRelay::open(config.gpio.output_pin) {
            Ok(relay) => return Box::new(relay),
            Err(e) => log::warn!(
                "gpio{} unavailable ({:#}); falling back to simulated relay",
                config.gpio.output_pin,
                e
            ),
        }
    }
    #[cfg(not(target_os = "linux"))]
    log::warn!("no GPIO support on this platform; using simulated relay");

    Box::new(SimulatedRelay)
}

fn build_detector(settings: &DetectorSettings, camera: &CameraConfig) -> Result<Box<dyn Detector>> {
    match settings.backend.as_str() {
        "motion-stub" => Ok(Box::new(MotionStubDetector::new())),
        "simulated" => Ok(Box::new(SimulatedDetector::default())),
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let model_path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("detector backend 'tract' needs a model_path"))?;
                let detector = YoloPersonDetector::new(model_path, SOURCE_WIDTH, SOURCE_HEIGHT)?
                    .with_threshold(settings.confidence_threshold);
                Ok(Box::new(detector))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ))
            }
        }
        other => Err(anyhow!(
            "unknown detector backend '{}' for camera '{}'",
            other,
            camera.id
        )),
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
