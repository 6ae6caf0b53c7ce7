// Motor + encoder boundary
//
// Hardware drivers implement ActuatorPort; controllers own their ports
// exclusively and are the only code that commands effort.

use super::units::Turns;

/// One motor with encoder feedback and a normalized effort input
///
/// Ports never clamp: callers pass efforts already bounded to [-1, 1].
pub trait ActuatorPort: Send {
    /// Shaft position accumulated since power-on
    fn get_position(&self) -> Turns;

    /// Signed shaft speed in turns per second
    fn get_velocity(&self) -> f64;

    fn set_effort(&mut self, effort: f64);
}

/// Boxed port as held by the controllers
pub type Actuator = Box<dyn ActuatorPort>;

/// Clamp an effort magnitude to [0, ceiling]
///
/// A correction larger than the base effort idles the motor rather than
/// reversing it.
pub fn bound_effort(value: f64, ceiling: f64) -> f64 {
    value.clamp(0.0, ceiling)
}

/// Clamp a signed effort to the port's [-1, 1] range
pub fn clamp_effort(effort: f64) -> f64 {
    effort.clamp(-1.0, 1.0)
}

/// Apply the sign of a remaining distance to an effort magnitude
///
/// Zero distance counts as positive.
pub fn toward(magnitude: f64, remaining: Turns) -> f64 {
    if remaining.value() < 0.0 {
        -magnitude
    } else {
        magnitude
    }
}
