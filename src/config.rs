//! Teleoperation configuration.
//!
//! Every value has a default matching the reference setup (Vive controller
//! driving a Panda-class arm), so a config file only needs the fields that
//! differ.
//!
//! ```no_run
//! use vive_teleop::TeleopConfig;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = TeleopConfig::load("teleop.json")?;
//! println!("streaming {} from {}:{}", config.stream.device_name, config.stream.host, config.stream.port);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("deadband must not be negative")]
    NegativeDeadband,

    #[error("clamp ({clamp}) must be greater than deadband ({deadband})")]
    ClampBelowDeadband { clamp: f64, deadband: f64 },

    #[error("device name must not be empty")]
    EmptyDeviceName,
}

/// Where to get controller samples from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pose stream server host
    pub host: String,
    /// Pose stream server port
    pub port: u16,
    /// Device to follow (e.g. "controller_1")
    pub device_name: String,
    /// Samples older than this are treated as missing
    pub stale_after_ms: u64,
    /// Re-send the subscription after this long without a sample for the device
    pub resubscribe_ms: u64,
    /// Renew the subscription this often while data is flowing
    pub keepalive_ms: u64,
    /// Pause after a socket error before receiving again
    pub retry_backoff_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.103".to_string(),
            port: 8000,
            device_name: "controller_1".to_string(),
            stale_after_ms: 500,
            resubscribe_ms: 1000,
            keepalive_ms: 2000,
            retry_backoff_ms: 100,
        }
    }
}

impl StreamConfig {
    pub fn new(host: &str, port: u16, device_name: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            device_name: device_name.to_string(),
            ..Default::default()
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn resubscribe(&self) -> Duration {
        Duration::from_millis(self.resubscribe_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Gains and filters for turning controller motion into robot motion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Meters of robot travel per meter of controller travel
    pub velocity_scale: f64,
    /// Degrees of robot rotation per unit of controller angular rate
    pub rot_vel_scale: f64,
    /// Angular rates at or below this magnitude are ignored
    pub deadband: f64,
    /// Angular rates are limited to this magnitude
    pub clamp: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            velocity_scale: 0.4,
            rot_vel_scale: 0.3,
            deadband: 0.1,
            clamp: 1.6,
        }
    }
}

/// Control loop timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Tick period
    pub period_ms: u64,
    /// Delay before polling again when the controller is missing
    pub missing_backoff_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            missing_backoff_ms: 1000,
        }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn missing_backoff(&self) -> Duration {
        Duration::from_millis(self.missing_backoff_ms)
    }
}

/// Gripper command parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    /// Finger width to grasp at (meters)
    pub grasp_width: f64,
    /// Closing speed (m/s)
    pub grasp_speed: f64,
    /// Grasp tolerance passed along with the grasp command
    pub force_margin: f64,
    /// Finger width when opened (meters)
    pub open_width: f64,
    /// Opening speed (m/s)
    pub open_speed: f64,
    /// Give up on startup homing after this long
    pub homing_timeout_ms: u64,
    /// How often to poll an action while waiting on it
    pub poll_interval_ms: u64,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            grasp_width: 0.035,
            grasp_speed: 0.2,
            force_margin: 0.06,
            open_width: 0.08,
            open_speed: 0.2,
            homing_timeout_ms: 30_000,
            poll_interval_ms: 10,
        }
    }
}

impl GripperConfig {
    pub fn homing_timeout(&self) -> Duration {
        Duration::from_millis(self.homing_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete teleoperation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    pub stream: StreamConfig,
    pub motion: MotionConfig,
    pub control: ControlConfig,
    pub gripper: GripperConfig,
}

impl TeleopConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.device_name.is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if self.stream.stale_after_ms == 0 {
            return Err(ConfigError::NotPositive("stream.stale_after_ms"));
        }
        if self.stream.resubscribe_ms == 0 {
            return Err(ConfigError::NotPositive("stream.resubscribe_ms"));
        }
        if self.stream.keepalive_ms == 0 {
            return Err(ConfigError::NotPositive("stream.keepalive_ms"));
        }
        if !(self.motion.velocity_scale > 0.0) {
            return Err(ConfigError::NotPositive("motion.velocity_scale"));
        }
        if !(self.motion.rot_vel_scale > 0.0) {
            return Err(ConfigError::NotPositive("motion.rot_vel_scale"));
        }
        if !(self.motion.deadband >= 0.0) {
            return Err(ConfigError::NegativeDeadband);
        }
        if !(self.motion.clamp > self.motion.deadband) {
            return Err(ConfigError::ClampBelowDeadband {
                clamp: self.motion.clamp,
                deadband: self.motion.deadband,
            });
        }
        if self.control.period_ms == 0 {
            return Err(ConfigError::NotPositive("control.period_ms"));
        }
        if self.control.missing_backoff_ms == 0 {
            return Err(ConfigError::NotPositive("control.missing_backoff_ms"));
        }
        if self.gripper.poll_interval_ms == 0 {
            return Err(ConfigError::NotPositive("gripper.poll_interval_ms"));
        }
        Ok(())
    }
}
