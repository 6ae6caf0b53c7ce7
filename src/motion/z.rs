// Probe lift (Z axis) controller
//
// The lift has no target positions: it bangs up or down until the motor stalls
// against the top stop or the soil. Homing records the top as the reference
// every other height is measured from.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actuator::{Actuator, clamp_effort};
use super::clock::LoopClock;
use super::error::{Axis, MotionError, Result, require_sign};
use super::kinematics::GantryKinematics;
use super::units::Millimeters;
use crate::config::ZConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Homing {
    Unhomed,
    /// Scaled position latched against the top stop
    Homed { top: Millimeters },
}

/// Controller for the single-motor probe lift
pub struct ZMotion {
    motor: Actuator,
    kinematics: GantryKinematics,
    config: ZConfig,
    up_sign: f64,
    clock: LoopClock,
    homing: Homing,
}

impl ZMotion {
    pub fn new(motor: Actuator, config: ZConfig, clock: LoopClock) -> Result<Self> {
        config.validate()?;
        let kinematics = GantryKinematics::new(config.turns_to_mm())?;
        let up_sign = require_sign("up_sign", config.up_sign)?;
        let mut z = Self {
            motor,
            kinematics,
            config,
            up_sign,
            clock,
            homing: Homing::Unhomed,
        };
        z.stop();
        Ok(z)
    }

    pub fn config(&self) -> &ZConfig {
        &self.config
    }

    pub fn is_homed(&self) -> bool {
        matches!(self.homing, Homing::Homed { .. })
    }

    pub fn stop(&mut self) {
        self.motor.set_effort(0.0);
    }

    /// Height below the top stop (positive = lowered)
    ///
    /// Readable while unhomed, but then it is only the raw scaled encoder value.
    pub fn get_position(&self) -> Millimeters {
        let absolute = self.absolute();
        match self.homing {
            Homing::Homed { top } => self.lowered(absolute, top),
            Homing::Unhomed => {
                warn!("Z axis not homed, uncalibrated position {}", absolute);
                absolute
            }
        }
    }

    /// True when the probe is close enough to the top for XY travel
    pub fn safe_to_move(&self) -> bool {
        self.check_clearance().is_ok()
    }

    /// Like [`safe_to_move`](Self::safe_to_move), with the reason when it is not
    pub fn check_clearance(&self) -> Result<()> {
        let top = match self.homing {
            Homing::Homed { top } => top,
            Homing::Unhomed => return Err(MotionError::NotHomed { axis: Axis::Z }),
        };
        let offset = self.lowered(self.absolute(), top);
        let limit = Millimeters(self.config.z_safe_move_height);
        if offset.abs() > limit {
            debug!("Z axis {} from top, not up enough to move XY", offset);
            return Err(MotionError::UnsafeZHeight { offset, limit });
        }
        Ok(())
    }

    /// Bang against the top stop and latch it as the reference
    pub async fn home(&mut self) -> Result<()> {
        info!("Homing Z axis");
        let effort = self.config.home_effort.abs() * self.up_sign;
        self.bang(effort, "Z home").await?;
        let top = self.absolute();
        self.homing = Homing::Homed { top };
        info!("Z axis homed, top at {}", top);
        Ok(())
    }

    /// Raise until the top stop
    pub async fn up(&mut self, effort: f64) -> Result<()> {
        self.bang(effort.abs() * self.up_sign, "Z up").await
    }

    /// Lower until the probe stalls in soil (or at the bottom of its travel)
    pub async fn down(&mut self, effort: f64) -> Result<()> {
        self.bang(-effort.abs() * self.up_sign, "Z down").await?;
        if let Homing::Homed { top } = self.homing {
            let depth = self.lowered(self.absolute(), top);
            if depth.value() >= self.config.travel_distance {
                warn!(
                    "Z axis reached {} of travel without meeting soil",
                    depth
                );
            } else {
                debug!("Z axis bottomed at {}", depth);
            }
        }
        Ok(())
    }

    /// Home, lower fully, and report how far the probe dropped
    pub async fn measure_throw(&mut self) -> Result<Millimeters> {
        self.home().await?;
        let effort = self.config.travel_effort;
        self.down(effort).await?;
        let throw = self.get_position();
        info!("Z axis throw is {}", throw);
        Ok(throw)
    }

    async fn bang(&mut self, effort: f64, operation: &'static str) -> Result<()> {
        let started = Instant::now();
        self.motor.set_effort(clamp_effort(effort));
        if let Err(e) = self.clock.settle(operation, started).await {
            self.stop();
            return Err(e);
        }

        while self.motor.get_velocity().abs() > self.config.stall_velocity {
            if let Err(e) = self.clock.wait_tick(operation, started).await {
                self.stop();
                return Err(e);
            }
        }

        self.stop();
        Ok(())
    }

    fn absolute(&self) -> Millimeters {
        self.kinematics.turns_to_mm(self.motor.get_position())
    }

    /// Distance below the top, positive whichever way the motor is wired
    fn lowered(&self, absolute: Millimeters, top: Millimeters) -> Millimeters {
        (absolute - top) * -self.up_sign
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::motion::{StopToken, Turns};
    use crate::sim::SimAxis;

    // 12 mm pinion: ~37.7 mm per turn; 0.4 turns is ~15 mm of travel
    fn lift() -> SimAxis {
        SimAxis::new(1.0).with_limits(Turns(-0.2), Turns(0.2))
    }

    fn controller(axis: &SimAxis, config: ZConfig) -> ZMotion {
        let timing = TimingConfig {
            timeout_s: Some(60.0),
            ..TimingConfig::default()
        };
        ZMotion::new(axis.port(), config, LoopClock::from_config(&timing, StopToken::new())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_latches_top() {
        let axis = lift();
        let mut z = controller(&axis, ZConfig::default());
        assert!(!z.safe_to_move());

        z.home().await.unwrap();
        // Default up sign is negative: the top stop is the lower limit
        assert_eq!(axis.position(), Turns(-0.2));
        assert!(z.get_position().value().abs() < 1e-9);
        assert!(z.safe_to_move());
        assert_eq!(axis.effort(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowered_probe_blocks_xy() {
        let axis = lift();
        let mut z = controller(&axis, ZConfig::default());
        z.home().await.unwrap();
        z.down(1.0).await.unwrap();

        let depth = z.get_position();
        assert!((depth.value() - 0.4 * 12.0 * std::f64::consts::PI).abs() < 0.1, "depth {}", depth);
        assert!(!z.safe_to_move());
        assert!(matches!(
            z.check_clearance(),
            Err(MotionError::UnsafeZHeight { .. })
        ));

        z.up(1.0).await.unwrap();
        assert!(z.safe_to_move());
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_band_edges() {
        let axis = lift();
        // 15 mm throw with a 16 mm band: fully lowered is still inside the band
        let wide = ZConfig {
            z_safe_move_height: 16.0,
            ..ZConfig::default()
        };
        let mut z = controller(&axis, wide);
        z.home().await.unwrap();
        z.down(1.0).await.unwrap();
        assert!(z.safe_to_move());
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_up_sign() {
        let axis = lift();
        let config = ZConfig {
            up_sign: 1.0,
            ..ZConfig::default()
        };
        let mut z = controller(&axis, config);
        z.home().await.unwrap();
        assert_eq!(axis.position(), Turns(0.2));

        z.down(0.5).await.unwrap();
        assert_eq!(axis.position(), Turns(-0.2));
        assert!(z.get_position().value() > 14.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_throw() {
        let axis = lift();
        let mut z = controller(&axis, ZConfig::default());
        let throw = z.measure_throw().await.unwrap();
        assert!((throw.value() - 15.08).abs() < 0.1, "throw {}", throw);
    }

    #[test]
    fn test_unhomed_position_is_raw() {
        let axis = lift();
        let z = controller(&axis, ZConfig::default());
        assert_eq!(z.get_position(), Millimeters(0.0));
        assert_eq!(
            z.check_clearance(),
            Err(MotionError::NotHomed { axis: Axis::Z })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_cancels_bang() {
        let axis = lift();
        let stop = StopToken::new();
        let mut z = ZMotion::new(
            axis.port(),
            ZConfig::default(),
            LoopClock::from_config(&TimingConfig::default(), stop.clone()),
        )
        .unwrap();
        stop.trigger();
        let err = z.home().await.unwrap_err();
        assert_eq!(err, MotionError::Cancelled { operation: "Z home" });
        assert_eq!(axis.effort(), 0.0);
        assert!(!z.is_homed());
    }
}
