// Motion control for the AgBot gantry
//
// Provides:
// - Unit types and belt gantry kinematics (belt-space <-> Cartesian)
// - The actuator port boundary to motor drivers
// - Closed-loop XY, probe lift (Z) and pump controllers

pub mod actuator;
pub mod clock;
pub mod error;
pub mod kinematics;
pub mod pump;
pub mod units;
pub mod xy;
pub mod z;

pub use actuator::{Actuator, ActuatorPort};
pub use clock::{LoopClock, StopToken};
pub use error::{Axis, MotionError, Result};
pub use kinematics::{GantryKinematics, belt_to_cartesian, cartesian_to_belt};
pub use pump::Pump;
pub use units::{Milliliters, Millimeters, Ticks, Turns};
pub use xy::{Bounds, XyMotion};
pub use z::ZMotion;
