// Timeouts, topics, gantry calibration
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motion::error::{require_effort, require_positive, require_sign};
use crate::motion::kinematics::{
    DEFAULT_MOTOR_REDUCTION, DEFAULT_PULLEY_PITCH_MM, DEFAULT_PULLEY_TEETH, pulley_mm_per_turn,
};
use crate::motion::{MotionError, Turns};

// Runtime loop frequency (command drain rate)
pub const LOOP_HZ: u64 = 20;

// Position/health publish frequency, must divide LOOP_HZ
pub const TELEMETRY_HZ: u64 = 2;

// Zenoh topics
pub const TOPIC_CMD: &str = "agbot/cmd"; // commands
pub const TOPIC_REPLY: &str = "agbot/state/reply"; // command outcomes
pub const TOPIC_POSITION: &str = "agbot/state/position"; // homed, x, y, z
pub const TOPIC_HEALTH: &str = "agbot/state/health"; // health status

// Where the gantry parks after startup calibration (mm)
pub const PARK_POSITION_MM: (f64, f64) = (20.0, 20.0);

// Depth of the command queue between the bus and the motion worker
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration rejected: {0}")]
    Invalid(#[from] MotionError),
}

/// XY belt gantry calibration and loop tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XyConfig {
    pub motor_reduction: f64,
    pub pulley_teeth: u32,
    pub pulley_pitch_mm: f64,

    // Point move
    pub base_effort: f64,
    pub kp: f64,
    pub proximity_distance_mm: f64,
    pub slow_down_distance_mm: f64,
    pub slow_down_effort: f64,

    // Stall-seeking bangs
    pub bang_effort: f64,
    pub bang_kp: f64,
    /// Speed at or below which a motor counts as stalled (turns/s)
    pub stall_velocity: f64,
}

impl Default for XyConfig {
    fn default() -> Self {
        Self {
            motor_reduction: DEFAULT_MOTOR_REDUCTION,
            pulley_teeth: DEFAULT_PULLEY_TEETH,
            pulley_pitch_mm: DEFAULT_PULLEY_PITCH_MM,
            base_effort: 0.8,
            kp: 10.0,
            proximity_distance_mm: 5.0,
            slow_down_distance_mm: 10.0,
            slow_down_effort: 0.5,
            bang_effort: 0.9,
            bang_kp: 0.2,
            stall_velocity: 0.08, // ~5 rpm
        }
    }
}

impl XyConfig {
    /// Belt millimeters per motor turn
    pub fn turns_to_mm(&self) -> f64 {
        pulley_mm_per_turn(self.motor_reduction, self.pulley_teeth, self.pulley_pitch_mm)
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        require_positive("motor_reduction", self.motor_reduction)?;
        require_positive("pulley_teeth", self.pulley_teeth as f64)?;
        require_positive("pulley_pitch_mm", self.pulley_pitch_mm)?;
        require_effort("base_effort", self.base_effort)?;
        require_positive("kp", self.kp)?;
        require_positive("proximity_distance_mm", self.proximity_distance_mm)?;
        require_positive("slow_down_distance_mm", self.slow_down_distance_mm)?;
        if self.slow_down_distance_mm < self.proximity_distance_mm {
            // The slow-down zone would sit entirely inside the stop radius
            return Err(MotionError::InvalidCalibration {
                name: "slow_down_distance_mm",
                value: self.slow_down_distance_mm,
            });
        }
        require_effort("slow_down_effort", self.slow_down_effort)?;
        require_effort("bang_effort", self.bang_effort)?;
        require_positive("bang_kp", self.bang_kp)?;
        require_positive("stall_velocity", self.stall_velocity)?;
        Ok(())
    }
}

/// Probe lift calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZConfig {
    /// Pinion diameter; one turn moves the probe d * pi mm
    pub gear_diameter_mm: f64,
    /// Effort sign that raises the probe (-1 or 1)
    pub up_sign: f64,
    /// Largest offset from the top at which XY travel is allowed (mm)
    pub z_safe_move_height: f64,
    /// Expected probe travel; reaching it means the probe found no soil (mm)
    pub travel_distance: f64,
    pub home_effort: f64,
    pub travel_effort: f64,
    /// Speed at or below which the lift counts as stalled (turns/s)
    pub stall_velocity: f64,
}

impl Default for ZConfig {
    fn default() -> Self {
        Self {
            gear_diameter_mm: 12.0,
            up_sign: -1.0,
            z_safe_move_height: 10.0,
            travel_distance: 20.0,
            home_effort: 0.7,
            travel_effort: 1.0,
            stall_velocity: 0.02,
        }
    }
}

impl ZConfig {
    pub fn turns_to_mm(&self) -> f64 {
        self.gear_diameter_mm * PI
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        require_positive("gear_diameter_mm", self.gear_diameter_mm)?;
        require_sign("up_sign", self.up_sign)?;
        require_positive("z_safe_move_height", self.z_safe_move_height)?;
        require_positive("travel_distance", self.travel_distance)?;
        require_effort("home_effort", self.home_effort)?;
        require_effort("travel_effort", self.travel_effort)?;
        require_positive("stall_velocity", self.stall_velocity)?;
        Ok(())
    }
}

/// Volumetric pump calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Motor turns per dispensed milliliter
    pub turns_to_ml: f64,
    /// Volume flushed through the line by a purge
    pub purge_ml: f64,
    /// Effort sign that dispenses (-1 or 1)
    pub dispense_direction: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            turns_to_ml: 1.5,
            purge_ml: 10.0,
            dispense_direction: 1.0,
        }
    }
}

impl PumpConfig {
    pub fn turns_for(&self, ml: f64) -> Turns {
        Turns(ml * self.turns_to_ml)
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        require_positive("turns_to_ml", self.turns_to_ml)?;
        require_positive("purge_ml", self.purge_ml)?;
        require_sign("dispense_direction", self.dispense_direction)?;
        Ok(())
    }
}

/// Control loop pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub settle_ms: u64,
    /// Unset: bangs and moves run until they converge or stall
    pub timeout_s: Option<f64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            settle_ms: 500,
            timeout_s: None,
        }
    }
}

impl TimingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_s.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        require_positive("tick_ms", self.tick_ms as f64)?;
        if let Some(limit) = self.timeout_s {
            require_positive("timeout_s", limit)?;
        }
        Ok(())
    }
}

/// Complete robot configuration, injected once at startup
///
/// # TOML Example
///
/// ```toml
/// [xy]
/// base_effort = 0.8
/// kp = 10.0
///
/// [z]
/// up_sign = -1
///
/// [timing]
/// timeout_s = 120.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgBotConfig {
    pub xy: XyConfig,
    pub z: ZConfig,
    pub pump: PumpConfig,
    pub timing: TimingConfig,
}

impl AgBotConfig {
    /// Load and validate a TOML file; missing keys take reference defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        self.xy.validate()?;
        self.z.validate()?;
        self.pump.validate()?;
        self.timing.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        AgBotConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = AgBotConfig::from_toml("").unwrap();
        assert_eq!(config, AgBotConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = AgBotConfig::from_toml(
            r#"
            [xy]
            kp = 4.0

            [timing]
            timeout_s = 90.0
            "#,
        )
        .unwrap();
        assert_eq!(config.xy.kp, 4.0);
        assert_eq!(config.xy.base_effort, 0.8);
        assert_eq!(config.timing.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_zero_pitch_rejected() {
        let err = AgBotConfig::from_toml("[xy]\npulley_pitch_mm = 0.0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(MotionError::InvalidCalibration {
                name: "pulley_pitch_mm",
                ..
            })
        ));
    }

    #[test]
    fn test_effort_above_one_rejected() {
        let mut config = AgBotConfig::default();
        config.xy.slow_down_effort = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slow_down_inside_proximity_rejected() {
        let err = AgBotConfig::from_toml(
            "[xy]\nproximity_distance_mm = 8.0\nslow_down_distance_mm = 6.0\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(MotionError::InvalidCalibration {
                name: "slow_down_distance_mm",
                value,
            }) if value == 6.0
        ));

        // Equal thresholds are allowed: the move simply never slows
        let mut config = AgBotConfig::default();
        config.xy.slow_down_distance_mm = config.xy.proximity_distance_mm;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sign_rejected() {
        let mut config = AgBotConfig::default();
        config.pump.dispense_direction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_ratios() {
        let config = AgBotConfig::default();
        assert!((config.xy.turns_to_mm() - 9.0).abs() < 1e-12);
        assert!((config.z.turns_to_mm() - 12.0 * PI).abs() < 1e-12);
        assert_eq!(config.pump.turns_for(2.0), Turns(3.0));
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = AgBotConfig::from_toml(include_str!("../config/agbot.toml")).unwrap();
        assert!((config.xy.turns_to_mm() - 9.0).abs() < 1e-9);
        assert_eq!(config.timing.timeout(), None);
    }

    #[test]
    fn test_missing_file() {
        let err = AgBotConfig::load(Path::new("/nonexistent/agbot.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
