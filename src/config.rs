//! Monitor configuration.
//!
//! Configuration lives in a JSON file (cameras, zones, gpio, detector) with a
//! handful of environment overrides for deployment knobs. All validation
//! happens here, at the point of accepting configuration: a camera with an
//! empty source locator or a zone with fewer than three vertices never
//! reaches a running worker.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::geometry::{Point, Polygon};
use crate::zone::Zone;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_OUTPUT_PIN: u32 = 17;
const DEFAULT_DEACTIVATION_DELAY_SECS: f64 = 0.5;
const DEFAULT_STATUS_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_RELAY_TICK_MS: u64 = 50;
const DEFAULT_DETECTOR_BACKEND: &str = "motion-stub";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Camera and zone identifiers: 1..64 of [a-z0-9_-], starting alphanumeric.
pub fn validate_id(id: &str) -> Result<()> {
    static ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").unwrap());

    if !re.is_match(id) {
        return Err(anyhow!(
            "identifier '{}' must match ^[a-z0-9][a-z0-9_-]{{0,63}}$",
            id
        ));
    }
    Ok(())
}

/// One configured camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    /// Source locator ("rtsp://..." or "stub://..." for synthetic frames).
    pub source: String,
    /// Target sample rate; frames are skipped to hold roughly this rate.
    #[serde(default = "default_fps")]
    pub target_fps: u32,
}

fn default_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

/// One configured zone: a polygon on a camera's image plane.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    pub points: Vec<Point>,
    /// Resolution of the snapshot the polygon was drawn on.
    pub reference_width: u32,
    pub reference_height: u32,
}

impl ZoneConfig {
    pub fn to_zone(&self) -> Zone {
        Zone {
            id: self.id.clone(),
            camera_id: self.camera_id.clone(),
            name: self.name.clone(),
            polygon: Polygon::new(
                self.points.clone(),
                self.reference_width,
                self.reference_height,
            ),
        }
    }
}

/// Relay output configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpioConfig {
    pub output_pin: u32,
    /// True when the relay engages on a HIGH level.
    pub active_high: bool,
    /// Seconds the relay stays engaged after the last zone clears.
    pub deactivation_delay_secs: f64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            output_pin: DEFAULT_OUTPUT_PIN,
            active_high: true,
            deactivation_delay_secs: DEFAULT_DEACTIVATION_DELAY_SECS,
        }
    }
}

impl GpioConfig {
    pub fn deactivation_delay(&self) -> Duration {
        Duration::from_secs_f64(self.deactivation_delay_secs.max(0.0))
    }
}

/// Inference backend selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// "motion-stub", "simulated", or "tract" (feature: backend-tract).
    pub backend: String,
    /// ONNX model path for the tract backend.
    pub model_path: Option<String>,
    pub confidence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Top-level monitor configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub detector: DetectorSettings,
    /// Seconds between status snapshots.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: f64,
    /// Relay controller tick in milliseconds; expires deactivation delays
    /// even when no zone transitions arrive.
    #[serde(default = "default_relay_tick")]
    pub relay_tick_ms: u64,
}

fn default_status_interval() -> f64 {
    DEFAULT_STATUS_INTERVAL_SECS
}

fn default_relay_tick() -> u64 {
    DEFAULT_RELAY_TICK_MS
}

impl MonitorConfig {
    /// Load from a JSON file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let mut cfg: MonitorConfig = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a JSON file, writing a default config first when the file
    /// does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            let defaults = MonitorConfig::default();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| anyhow!("failed to create {}: {}", dir.display(), e))?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&defaults)?)
                .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
            log::info!("created default configuration at {}", path.display());
        }
        Self::load(path)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(pin) = std::env::var("ZONEGUARD_OUTPUT_PIN") {
            self.gpio.output_pin = pin
                .parse()
                .map_err(|_| anyhow!("ZONEGUARD_OUTPUT_PIN must be an integer pin number"))?;
        }
        if let Ok(delay) = std::env::var("ZONEGUARD_DEACTIVATION_DELAY_SECS") {
            self.gpio.deactivation_delay_secs = delay.parse().map_err(|_| {
                anyhow!("ZONEGUARD_DEACTIVATION_DELAY_SECS must be a number of seconds")
            })?;
        }
        if let Ok(interval) = std::env::var("ZONEGUARD_STATUS_INTERVAL_SECS") {
            self.status_interval_secs = interval.parse().map_err(|_| {
                anyhow!("ZONEGUARD_STATUS_INTERVAL_SECS must be a number of seconds")
            })?;
        }
        if let Ok(backend) = std::env::var("ZONEGUARD_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut camera_ids = std::collections::HashSet::new();
        for camera in &self.cameras {
            validate_id(&camera.id)?;
            if !camera_ids.insert(camera.id.as_str()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.id));
            }
            if camera.source.trim().is_empty() {
                return Err(anyhow!("camera '{}' has an empty source locator", camera.id));
            }
            if camera.target_fps == 0 {
                return Err(anyhow!("camera '{}' target_fps must be >= 1", camera.id));
            }
        }

        let mut zone_ids = std::collections::HashSet::new();
        for zone in &self.zones {
            validate_id(&zone.id)?;
            if !zone_ids.insert(zone.id.as_str()) {
                return Err(anyhow!("duplicate zone id '{}'", zone.id));
            }
            if !camera_ids.contains(zone.camera_id.as_str()) {
                return Err(anyhow!(
                    "zone '{}' references unknown camera '{}'",
                    zone.id,
                    zone.camera_id
                ));
            }
            if zone.points.len() < 3 {
                return Err(anyhow!(
                    "zone '{}' needs at least 3 points, has {}",
                    zone.id,
                    zone.points.len()
                ));
            }
            if zone.reference_width == 0 || zone.reference_height == 0 {
                return Err(anyhow!(
                    "zone '{}' reference resolution must be non-zero",
                    zone.id
                ));
            }
        }

        if !self.gpio.deactivation_delay_secs.is_finite() || self.gpio.deactivation_delay_secs < 0.0
        {
            return Err(anyhow!("gpio deactivation_delay_secs must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("detector confidence_threshold must be within 0..=1"));
        }
        if self.status_interval_secs <= 0.0 || !self.status_interval_secs.is_finite() {
            return Err(anyhow!("status_interval_secs must be > 0"));
        }
        if self.relay_tick_ms == 0 {
            return Err(anyhow!("relay_tick_ms must be >= 1"));
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs_f64(self.status_interval_secs)
    }

    pub fn relay_tick(&self) -> Duration {
        Duration::from_millis(self.relay_tick_ms)
    }

    /// Zone definitions as runtime zones.
    pub fn zone_definitions(&self) -> Vec<Zone> {
        self.zones.iter().map(ZoneConfig::to_zone).collect()
    }
}
