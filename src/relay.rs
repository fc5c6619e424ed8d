//! Relay control.
//!
//! The `RelayController` is the sole owner of the relay state and the sole
//! writer of the physical output. Activation is edge-triggered with a
//! one-sided delay: the relay engages the instant any zone becomes occupied
//! and releases only after the configured deactivation delay has elapsed
//! since occupancy last cleared everywhere. For a safety output, failing to
//! engage is worse than staying engaged slightly too long.

use std::time::{Instant, SystemTime};

use anyhow::Result;
use serde::Serialize;

use crate::config::GpioConfig;
use crate::epoch_s;

/// Relay-output capability: sets the physical pin level.
///
/// The controller resolves polarity before calling, so `level` is the literal
/// electrical level to drive. Implementations must be safe to call
/// redundantly with the same level.
pub trait RelayOutput: Send {
    fn apply(&mut self, level: bool) -> Result<()>;
}

/// Log-only relay for development machines without GPIO hardware.
pub struct SimulatedRelay;

impl RelayOutput for SimulatedRelay {
    fn apply(&mut self, level: bool) -> Result<()> {
        log::info!("relay (simulated): level={}", if level { "high" } else { "low" });
        Ok(())
    }
}

/// Relay driven through the Linux sysfs GPIO interface.
#[cfg(target_os = "linux")]
pub struct SysfsRelay {
    value_path: std::path::PathBuf,
}

#[cfg(target_os = "linux")]
impl SysfsRelay {
    /// Export the pin and configure it as an output.
    pub fn open(pin: u32) -> Result<Self> {
        use anyhow::Context;
        use std::path::PathBuf;

        let base = PathBuf::from(format!("/sys/class/gpio/gpio{}", pin));
        if !base.exists() {
            std::fs::write("/sys/class/gpio/export", pin.to_string())
                .with_context(|| format!("export gpio{}", pin))?;
        }
        std::fs::write(base.join("direction"), "out")
            .with_context(|| format!("set gpio{} direction", pin))?;
        log::info!("gpio{} exported as relay output", pin);
        Ok(Self {
            value_path: base.join("value"),
        })
    }
}

#[cfg(target_os = "linux")]
impl RelayOutput for SysfsRelay {
    fn apply(&mut self, level: bool) -> Result<()> {
        use anyhow::Context;
        std::fs::write(&self.value_path, if level { "1" } else { "0" })
            .with_context(|| format!("write {}", self.value_path.display()))?;
        Ok(())
    }
}

/// A logical relay transition, reported once per edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayEdge {
    Activated,
    Deactivated,
}

/// Read-only view of the relay for status snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct RelayStatus {
    pub active: bool,
    /// Epoch seconds of the last activation or deactivation edge.
    pub changed_at_epoch_s: u64,
    pub output_pin: u32,
    pub active_high: bool,
    pub deactivation_delay_secs: f64,
}

/// Debounced activation state machine owning the physical output.
pub struct RelayController {
    output: Box<dyn RelayOutput>,
    config: GpioConfig,
    active: bool,
    changed_at: SystemTime,
    /// Set while the relay is active but no zone is occupied; anchors the
    /// deactivation countdown at the moment occupancy cleared everywhere.
    cleared_at: Option<Instant>,
}

impl RelayController {
    /// Create the controller and drive the output to its inactive level.
    pub fn new(config: GpioConfig, output: Box<dyn RelayOutput>) -> Result<Self> {
        let mut controller = Self {
            output,
            config,
            active: false,
            changed_at: SystemTime::now(),
            cleared_at: None,
        };
        controller.write_output()?;
        Ok(controller)
    }

    /// Re-evaluate against the current aggregate occupancy.
    ///
    /// Called on every zone transition and on a periodic tick so pending
    /// deactivation delays expire even when no transitions arrive.
    pub fn update(&mut self, any_occupied: bool) -> Result<Option<RelayEdge>> {
        self.update_at(Instant::now(), any_occupied)
    }

    /// `update` with an explicit clock reading, for deterministic tests.
    pub fn update_at(&mut self, now: Instant, any_occupied: bool) -> Result<Option<RelayEdge>> {
        if any_occupied {
            self.cleared_at = None;
            if !self.active {
                self.active = true;
                self.changed_at = SystemTime::now();
                self.write_output()?;
                log::info!("relay activated (zone occupied)");
                return Ok(Some(RelayEdge::Activated));
            }
            return Ok(None);
        }

        if !self.active {
            self.cleared_at = None;
            return Ok(None);
        }

        let cleared_at = *self.cleared_at.get_or_insert(now);
        if now.duration_since(cleared_at) >= self.config.deactivation_delay() {
            self.active = false;
            self.cleared_at = None;
            self.changed_at = SystemTime::now();
            self.write_output()?;
            log::info!(
                "relay deactivated ({}s after zones cleared)",
                self.config.deactivation_delay_secs
            );
            return Ok(Some(RelayEdge::Deactivated));
        }
        Ok(None)
    }

    /// Apply a new GPIO configuration at runtime.
    ///
    /// The current logical state is re-driven immediately so a polarity flip
    /// never leaves the physical output inverted. A changed output pin only
    /// takes effect on restart, since the output capability is pin-bound.
    pub fn apply_config(&mut self, config: GpioConfig) -> Result<()> {
        if config.output_pin != self.config.output_pin {
            log::warn!(
                "relay output pin changed {} -> {}; pin change takes effect on restart",
                self.config.output_pin,
                config.output_pin
            );
        }
        self.config = config;
        self.write_output()?;
        log::info!(
            "gpio config applied: active_high={} deactivation_delay={}s",
            self.config.active_high,
            self.config.deactivation_delay_secs
        );
        Ok(())
    }

    /// Drive the output to its inactive level, bypassing the delay.
    /// Used on shutdown so the process never exits with the relay engaged.
    pub fn release(&mut self) -> Result<Option<RelayEdge>> {
        self.cleared_at = None;
        if self.active {
            self.active = false;
            self.changed_at = SystemTime::now();
            self.write_output()?;
            log::info!("relay released on shutdown");
            return Ok(Some(RelayEdge::Deactivated));
        }
        self.write_output()?;
        Ok(None)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            active: self.active,
            changed_at_epoch_s: epoch_s(self.changed_at),
            output_pin: self.config.output_pin,
            active_high: self.config.active_high,
            deactivation_delay_secs: self.config.deactivation_delay_secs,
        }
    }

    fn write_output(&mut self) -> Result<()> {
        let level = self.active == self.config.active_high;
        self.output.apply(level)
    }
}
