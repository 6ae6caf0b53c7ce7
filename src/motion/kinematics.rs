// Belt gantry kinematics for the AgBot XY stage
// Converts between Cartesian carriage coordinates and the two diagonal belt paths,
// and between motor turns and belt millimeters.
//
// Motor A positive effort moves the carriage -X +Y
// Motor B positive effort moves the carriage -X -Y

use super::error::{Result, require_positive};
use super::units::{Millimeters, Turns};

/// Reference belt drive: (9/24) * (9/27) gear reduction, 36 tooth GT2 pulley
pub const DEFAULT_MOTOR_REDUCTION: f64 = (9.0 / 24.0) * (9.0 / 27.0);
pub const DEFAULT_PULLEY_TEETH: u32 = 36;
pub const DEFAULT_PULLEY_PITCH_MM: f64 = 2.0;

/// Convert a Cartesian position to belt-space
///
/// # Arguments
/// * `x` - Carriage X (positive = away from the homing corner)
/// * `y` - Carriage Y (positive = away from the homing corner)
///
/// # Returns
/// Belt coordinates `(a, b)`
pub fn cartesian_to_belt(x: Millimeters, y: Millimeters) -> (Millimeters, Millimeters) {
    let a = y - x;
    let b = -y - x;
    (a, b)
}

/// Convert belt-space coordinates to a Cartesian position
///
/// Exact inverse of [`cartesian_to_belt`].
pub fn belt_to_cartesian(a: Millimeters, b: Millimeters) -> (Millimeters, Millimeters) {
    let x = (-a - b) / 2.0;
    let y = (a - b) / 2.0;
    (x, y)
}

/// Belt travel per motor turn for a geared pulley drive
pub fn pulley_mm_per_turn(motor_reduction: f64, pulley_teeth: u32, pulley_pitch_mm: f64) -> f64 {
    motor_reduction * (pulley_teeth as f64 * pulley_pitch_mm)
}

/// Turns <-> millimeter scaling for one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GantryKinematics {
    mm_per_turn: f64,
}

impl GantryKinematics {
    /// Create with a belt travel per motor turn, which must be positive and finite
    pub fn new(mm_per_turn: f64) -> Result<Self> {
        let mm_per_turn = require_positive("turns_to_mm", mm_per_turn)?;
        Ok(Self { mm_per_turn })
    }

    pub fn turns_to_mm(&self, turns: Turns) -> Millimeters {
        Millimeters(turns.value() * self.mm_per_turn)
    }

    pub fn mm_to_turns(&self, mm: Millimeters) -> Turns {
        Turns(mm.value() / self.mm_per_turn)
    }

    /// Belt displacement in turns -> Cartesian displacement
    pub fn belt_turns_to_cartesian(&self, a: Turns, b: Turns) -> (Millimeters, Millimeters) {
        belt_to_cartesian(self.turns_to_mm(a), self.turns_to_mm(b))
    }

    /// Cartesian displacement -> belt displacement in turns
    pub fn cartesian_to_belt_turns(&self, x: Millimeters, y: Millimeters) -> (Turns, Turns) {
        let (a, b) = cartesian_to_belt(x, y);
        (self.mm_to_turns(a), self.mm_to_turns(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::error::MotionError;

    fn mm(v: f64) -> Millimeters {
        Millimeters(v)
    }

    #[test]
    fn test_zero_position() {
        let (a, b) = cartesian_to_belt(mm(0.0), mm(0.0));
        assert_eq!(a, Millimeters::ZERO);
        assert_eq!(b, Millimeters::ZERO);
    }

    #[test]
    fn test_pure_x_moves_both_belts_equally() {
        // +X shortens both belts by the same amount, so each motor turns negative
        let (a, b) = cartesian_to_belt(mm(10.0), mm(0.0));
        assert_eq!(a, mm(-10.0));
        assert_eq!(b, mm(-10.0));
    }

    #[test]
    fn test_pure_y_moves_belts_oppositely() {
        let (a, b) = cartesian_to_belt(mm(0.0), mm(10.0));
        assert_eq!(a, mm(10.0));
        assert_eq!(b, mm(-10.0));
    }

    #[test]
    fn test_motor_a_alone_moves_minus_x_plus_y() {
        let (x, y) = belt_to_cartesian(mm(2.0), mm(0.0));
        assert_eq!(x, mm(-1.0));
        assert_eq!(y, mm(1.0));
    }

    #[test]
    fn test_round_trip_over_workspace() {
        // Sweep a 400 x 300 mm workspace, including fractional coordinates
        let mut x = 0.0;
        while x <= 400.0 {
            let mut y = 0.0;
            while y <= 300.0 {
                let (a, b) = cartesian_to_belt(mm(x), mm(y));
                let (x2, y2) = belt_to_cartesian(a, b);
                assert!((x2.value() - x).abs() < 1e-9, "x drifted at ({}, {})", x, y);
                assert!((y2.value() - y).abs() < 1e-9, "y drifted at ({}, {})", x, y);
                y += 17.3;
            }
            x += 23.7;
        }
    }

    #[test]
    fn test_turns_mm_round_trip() {
        let k = GantryKinematics::new(12.0).unwrap();
        for t in [-1234.567, -1.0, 0.0, 1e-6, 0.333, 98765.4321] {
            let back = k.mm_to_turns(k.turns_to_mm(Turns(t)));
            assert!((back.value() - t).abs() < 1e-9, "round trip failed for {}", t);
        }
    }

    #[test]
    fn test_reference_drive_is_nine_mm_per_turn() {
        let k = pulley_mm_per_turn(
            DEFAULT_MOTOR_REDUCTION,
            DEFAULT_PULLEY_TEETH,
            DEFAULT_PULLEY_PITCH_MM,
        );
        assert!((k - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_belt_turns_to_cartesian_scales() {
        let k = GantryKinematics::new(12.0).unwrap();
        // One turn back on both belts is 12 mm of +X travel
        let (x, y) = k.belt_turns_to_cartesian(Turns(-1.0), Turns(-1.0));
        assert_eq!(x, mm(12.0));
        assert_eq!(y, mm(0.0));
    }

    #[test]
    fn test_non_positive_ratio_rejected() {
        for bad in [0.0, -9.0, f64::NAN, f64::INFINITY] {
            let err = GantryKinematics::new(bad).unwrap_err();
            assert!(matches!(err, MotionError::InvalidCalibration { name: "turns_to_mm", .. }));
        }
    }
}
