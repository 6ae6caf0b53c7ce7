// XY belt gantry controller
//
// Two motors drive a pair of diagonal belts. Homing bangs the carriage into
// the (0, 0) corner and latches the belt encoders there; every Cartesian
// position afterwards is measured from that latch.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actuator::{Actuator, bound_effort, clamp_effort, toward};
use super::clock::LoopClock;
use super::error::{Axis, MotionError, Result, require_positive};
use super::kinematics::GantryKinematics;
use super::units::{Millimeters, Turns};
use crate::config::XyConfig;

/// Workspace extent measured by `find_size` (or restored by the caller)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_max: Millimeters,
    pub y_max: Millimeters,
}

impl Bounds {
    pub fn new(x_max: Millimeters, y_max: Millimeters) -> Result<Self> {
        require_positive("x_max", x_max.value())?;
        require_positive("y_max", y_max.value())?;
        Ok(Self { x_max, y_max })
    }

    pub fn contains(&self, x: Millimeters, y: Millimeters) -> bool {
        x >= Millimeters::ZERO && x <= self.x_max && y >= Millimeters::ZERO && y <= self.y_max
    }
}

/// Belt encoder pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeltTurns {
    pub a: Turns,
    pub b: Turns,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Homing {
    Unhomed,
    /// Belt positions latched at the homing corner
    Homed { zero: BeltTurns },
}

/// Fraction of a commanded belt displacement already covered
///
/// An axis with nothing to do (or nothing left) reports 1.0 so it never drags
/// the other axis through the correction term.
pub fn progress(traveled: Turns, commanded: Turns, remaining: Turns) -> f64 {
    if commanded == Turns::ZERO || remaining == Turns::ZERO {
        1.0
    } else {
        traveled / commanded
    }
}

/// Effort pair for one tick of a synchronized move
///
/// The axis that is ahead gives up `kp * (progress_a - progress_b)` of the base
/// effort and the one behind gains it; magnitudes are clamped to [0, ceiling]
/// and signed toward each axis's target.
pub fn synchronized_efforts(
    progress_a: f64,
    progress_b: f64,
    remaining: BeltTurns,
    base_effort: f64,
    kp: f64,
    ceiling: f64,
) -> (f64, f64) {
    let correction = kp * (progress_a - progress_b);
    let a = bound_effort(base_effort - correction, ceiling);
    let b = bound_effort(base_effort + correction, ceiling);
    (toward(a, remaining.a), toward(b, remaining.b))
}

/// Controller for the two-motor belt gantry
pub struct XyMotion {
    motor_a: Actuator,
    motor_b: Actuator,
    kinematics: GantryKinematics,
    config: XyConfig,
    clock: LoopClock,
    homing: Homing,
    bounds: Option<Bounds>,
}

impl XyMotion {
    /// Take ownership of both belt motors; efforts start at zero, unhomed
    pub fn new(motor_a: Actuator, motor_b: Actuator, config: XyConfig, clock: LoopClock) -> Result<Self> {
        config.validate()?;
        let kinematics = GantryKinematics::new(config.turns_to_mm())?;
        let mut xy = Self {
            motor_a,
            motor_b,
            kinematics,
            config,
            clock,
            homing: Homing::Unhomed,
            bounds: None,
        };
        xy.stop();
        Ok(xy)
    }

    pub fn is_homed(&self) -> bool {
        matches!(self.homing, Homing::Homed { .. })
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Install a workspace extent measured earlier
    pub fn set_bounds(&mut self, bounds: Bounds) {
        info!("XY bounds set to {} x {}", bounds.x_max, bounds.y_max);
        self.bounds = Some(bounds);
    }

    pub fn kinematics(&self) -> &GantryKinematics {
        &self.kinematics
    }

    /// Belt positions latched by the last home
    pub fn zero_reference(&self) -> Result<BeltTurns> {
        match self.homing {
            Homing::Homed { zero } => Ok(zero),
            Homing::Unhomed => Err(self.not_homed("read the zero reference")),
        }
    }

    /// Zero both motors, in any state
    pub fn stop(&mut self) {
        self.motor_a.set_effort(0.0);
        self.motor_b.set_effort(0.0);
    }

    /// Carriage position relative to the homing corner
    pub fn get_position(&self) -> Result<(Millimeters, Millimeters)> {
        let zero = self.zero_reference()?;
        let belts = self.belts();
        Ok(self
            .kinematics
            .belt_turns_to_cartesian(belts.a - zero.a, belts.b - zero.b))
    }

    /// Bang into -X, then -Y, and latch the corner as (0, 0)
    pub async fn home(&mut self) -> Result<()> {
        info!("Homing gantry");
        self.bang(1.0, 1.0, "XY home").await?;
        debug!("-X bang done");
        self.bang(-1.0, 1.0, "XY home").await?;
        debug!("-Y bang done");

        let zero = self.belts();
        self.homing = Homing::Homed { zero };
        info!("Gantry homed, zero reference a={} b={}", zero.a, zero.b);
        Ok(())
    }

    /// Bang into +X, then +Y, and report the far corner as the workspace extent
    ///
    /// The measured bounds are also installed on this controller; persisting
    /// them is up to the caller.
    pub async fn find_size(&mut self) -> Result<Bounds> {
        if !self.is_homed() {
            return Err(self.not_homed("find size"));
        }
        self.bang(-1.0, -1.0, "XY find size").await?;
        debug!("+X bang done");
        self.bang(1.0, -1.0, "XY find size").await?;
        debug!("+Y bang done");

        let (x_max, y_max) = self.get_position()?;
        let bounds = Bounds::new(x_max, y_max)?;
        info!("Bounds found: x_max={} y_max={}", x_max, y_max);
        self.bounds = Some(bounds);
        Ok(bounds)
    }

    /// Move the carriage to an absolute position inside the bounds
    pub async fn move_to(&mut self, x: Millimeters, y: Millimeters) -> Result<()> {
        let bounds = self.require_ready()?;
        let from = self.get_position()?;
        info!("Moving to ({}, {})", x, y);
        self.travel(bounds, from, (x, y)).await?;
        debug!("Moved to ({}, {})", x, y);
        Ok(())
    }

    /// Move the carriage by a Cartesian offset, staying inside the bounds
    pub async fn move_relative(&mut self, dx: Millimeters, dy: Millimeters) -> Result<()> {
        let bounds = self.require_ready()?;
        let (x_at, y_at) = self.get_position()?;
        self.travel(bounds, (x_at, y_at), (x_at + dx, y_at + dy)).await
    }

    /// Bounds-check an absolute target, then drive the belts there
    async fn travel(
        &mut self,
        bounds: Bounds,
        from: (Millimeters, Millimeters),
        to: (Millimeters, Millimeters),
    ) -> Result<()> {
        let (x, y) = to;
        if !bounds.contains(x, y) {
            warn!("Gantry would leave bounds at ({}, {}), not moving", x, y);
            return Err(MotionError::OutOfBounds {
                x,
                y,
                x_max: bounds.x_max,
                y_max: bounds.y_max,
            });
        }

        let (dx, dy) = (x - from.0, y - from.1);
        let (delta_a, delta_b) = self.kinematics.cartesian_to_belt_turns(dx, dy);
        debug!(
            "Moving {} in x and {} in y (belts a={} b={})",
            dx, dy, delta_a, delta_b
        );
        self.move_belts(BeltTurns { a: delta_a, b: delta_b }).await
    }

    /// Synchronized point move by a belt displacement
    async fn move_belts(&mut self, delta: BeltTurns) -> Result<()> {
        let operation = "XY move";
        let started = Instant::now();
        let start = self.belts();
        let target = BeltTurns {
            a: start.a + delta.a,
            b: start.b + delta.b,
        };
        let mut ceiling = 1.0;

        loop {
            let at = self.belts();
            let remaining = BeltTurns {
                a: target.a - at.a,
                b: target.b - at.b,
            };

            let distance = self.kinematics.turns_to_mm(remaining.a.abs() + remaining.b.abs());
            if distance.value() <= self.config.proximity_distance_mm {
                break;
            } else if distance.value() <= self.config.slow_down_distance_mm {
                ceiling = self.config.slow_down_effort;
            }

            let progress_a = progress(at.a - start.a, delta.a, remaining.a);
            let progress_b = progress(at.b - start.b, delta.b, remaining.b);
            let (effort_a, effort_b) = synchronized_efforts(
                progress_a,
                progress_b,
                remaining,
                self.config.base_effort,
                self.config.kp,
                ceiling,
            );
            self.motor_a.set_effort(clamp_effort(effort_a));
            self.motor_b.set_effort(clamp_effort(effort_b));

            if let Err(e) = self.clock.wait_tick(operation, started).await {
                self.stop();
                return Err(e);
            }
        }

        self.stop();
        Ok(())
    }

    /// Drive both motors in the given directions until both stall on a hard stop
    async fn bang(&mut self, dir_a: f64, dir_b: f64, operation: &'static str) -> Result<()> {
        let started = Instant::now();
        let start = self.belts();
        let effort = self.config.bang_effort;
        let kp = self.config.bang_kp;

        self.motor_a.set_effort(clamp_effort(dir_a * effort));
        self.motor_b.set_effort(clamp_effort(dir_b * effort));
        if let Err(e) = self.clock.settle(operation, started).await {
            self.stop();
            return Err(e);
        }

        loop {
            let at = self.belts();
            let traveled_a = (at.a - start.a).abs();
            let traveled_b = (at.b - start.b).abs();
            let correction = kp * (traveled_a - traveled_b).value();
            self.motor_a
                .set_effort(clamp_effort(dir_a * bound_effort(effort - correction, 1.0)));
            self.motor_b
                .set_effort(clamp_effort(dir_b * bound_effort(effort + correction, 1.0)));

            let stall = self.config.stall_velocity;
            if self.motor_a.get_velocity().abs() <= stall && self.motor_b.get_velocity().abs() <= stall {
                break;
            }

            if let Err(e) = self.clock.wait_tick(operation, started).await {
                self.stop();
                return Err(e);
            }
        }

        self.stop();
        Ok(())
    }

    fn belts(&self) -> BeltTurns {
        BeltTurns {
            a: self.motor_a.get_position(),
            b: self.motor_b.get_position(),
        }
    }

    fn require_ready(&self) -> Result<Bounds> {
        if !self.is_homed() {
            return Err(self.not_homed("move"));
        }
        match self.bounds {
            Some(bounds) => Ok(bounds),
            None => {
                warn!("Bounds not set, run find_size before moving the gantry");
                Err(MotionError::BoundsUnset)
            }
        }
    }

    fn not_homed(&self, action: &str) -> MotionError {
        warn!("Gantry must be homed to {}", action);
        MotionError::NotHomed { axis: Axis::Xy }
    }
}
