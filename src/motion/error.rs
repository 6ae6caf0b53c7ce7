// Motion precondition and loop-termination errors

use std::fmt;
use std::time::Duration;

use super::units::{Milliliters, Millimeters};

/// Which controller rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Xy,
    Z,
    Pump,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Xy => write!(f, "XY"),
            Axis::Z => write!(f, "Z"),
            Axis::Pump => write!(f, "pump"),
        }
    }
}

/// Error types for gantry motion
///
/// Every variant is recoverable: the axis is left with zero effort and the
/// caller may retry after fixing the precondition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotionError {
    #[error("{axis} axis is not homed")]
    NotHomed { axis: Axis },

    #[error("workspace bounds are not set, run find_size or inject stored bounds")]
    BoundsUnset,

    #[error("target ({x}, {y}) is outside the workspace [0, {x_max}] x [0, {y_max}]")]
    OutOfBounds {
        x: Millimeters,
        y: Millimeters,
        x_max: Millimeters,
        y_max: Millimeters,
    },

    #[error("probe is {offset} from top, more than the {limit} safe move height")]
    UnsafeZHeight {
        offset: Millimeters,
        limit: Millimeters,
    },

    #[error("invalid calibration: {name} = {value}")]
    InvalidCalibration { name: &'static str, value: f64 },

    #[error("invalid dispense volume: {0}")]
    InvalidVolume(Milliliters),

    #[error("{operation} cancelled by stop request")]
    Cancelled { operation: &'static str },

    #[error("{operation} did not finish within {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
}

pub type Result<T> = std::result::Result<T, MotionError>;

/// Reject a calibration constant that is not strictly positive and finite
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MotionError::InvalidCalibration { name, value })
    }
}

/// Reject an effort outside (0, 1]
pub(crate) fn require_effort(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(MotionError::InvalidCalibration { name, value })
    }
}

/// Reject a direction sign that is zero or not finite, and normalize it to +/-1
pub(crate) fn require_sign(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value != 0.0 {
        Ok(1.0_f64.copysign(value))
    } else {
        Err(MotionError::InvalidCalibration { name, value })
    }
}
