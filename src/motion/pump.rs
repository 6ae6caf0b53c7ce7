// Volumetric pump controller
//
// Open loop: volume is assumed linear in motor turns, with no flow feedback.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actuator::{Actuator, clamp_effort};
use super::clock::LoopClock;
use super::error::{MotionError, Result, require_sign};
use super::units::{Milliliters, Turns};
use crate::config::PumpConfig;

pub struct Pump {
    motor: Actuator,
    config: PumpConfig,
    direction: f64,
    clock: LoopClock,
}

impl Pump {
    pub fn new(motor: Actuator, config: PumpConfig, clock: LoopClock) -> Result<Self> {
        config.validate()?;
        let direction = require_sign("dispense_direction", config.dispense_direction)?;
        let mut pump = Self {
            motor,
            config,
            direction,
            clock,
        };
        pump.stop();
        Ok(pump)
    }

    pub fn stop(&mut self) {
        self.motor.set_effort(0.0);
    }

    /// Dispense a volume
    ///
    /// Returns the turns actually driven, which may exceed the target by up to
    /// one tick of motion.
    pub async fn water(&mut self, ml: Milliliters) -> Result<Turns> {
        if !ml.is_finite() || ml < Milliliters::ZERO {
            warn!("Refusing to dispense {}", ml);
            return Err(MotionError::InvalidVolume(ml));
        }
        if ml == Milliliters::ZERO {
            debug!("Nothing to dispense");
            return Ok(Turns::ZERO);
        }
        let target = self.config.turns_for(ml.value());
        info!("Dispensing {} ({})", ml, target);
        self.turn(target).await
    }

    /// Flush the configured purge volume through the line
    pub async fn purge(&mut self) -> Result<Turns> {
        let ml = Milliliters(self.config.purge_ml);
        info!("Purging {}", ml);
        self.water(ml).await
    }

    async fn turn(&mut self, target: Turns) -> Result<Turns> {
        let operation = "pump";
        let started = Instant::now();
        let start = self.motor.get_position();
        self.motor.set_effort(clamp_effort(self.direction));

        loop {
            let traveled = (self.motor.get_position() - start).abs();
            if traveled >= target {
                self.stop();
                debug!("Pump stopped after {}", traveled);
                return Ok(traveled);
            }
            if let Err(e) = self.clock.wait_tick(operation, started).await {
                self.stop();
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::motion::StopToken;
    use crate::sim::SimAxis;

    const RATE: f64 = 2.0; // turns/s at full effort

    fn pump(axis: &SimAxis, config: PumpConfig) -> Pump {
        let clock = LoopClock::from_config(&TimingConfig::default(), StopToken::new());
        Pump::new(axis.port(), config, clock).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_water_stops_after_target_turns() {
        let axis = SimAxis::new(RATE);
        let mut pump = pump(&axis, PumpConfig::default());

        let turned = pump.water(Milliliters(4.0)).await.unwrap();
        // 4 ml * 1.5 turns/ml
        assert!(turned >= Turns(6.0));
        // Overshoot bounded by one 100 ms tick at full speed
        assert!(turned <= Turns(6.0 + RATE * 0.1 + 1e-6), "turned {}", turned);
        assert!(axis.position() > Turns(0.0), "positive direction dispenses");
        assert_eq!(axis.effort(), 0.0);
        assert_eq!(axis.peak_effort(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_dispense_direction() {
        let axis = SimAxis::new(RATE);
        let config = PumpConfig {
            dispense_direction: -1.0,
            ..PumpConfig::default()
        };
        let mut pump = pump(&axis, config);
        pump.water(Milliliters(1.0)).await.unwrap();
        assert!(axis.position() <= Turns(-1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_uses_configured_volume() {
        let axis = SimAxis::new(RATE);
        let mut pump = pump(&axis, PumpConfig::default());
        let turned = pump.purge().await.unwrap();
        assert!(turned >= Turns(15.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_and_negative_volumes() {
        let axis = SimAxis::new(RATE);
        let mut pump = pump(&axis, PumpConfig::default());
        assert_eq!(pump.water(Milliliters(0.0)).await.unwrap(), Turns::ZERO);
        assert_eq!(
            pump.water(Milliliters(-2.0)).await.unwrap_err(),
            MotionError::InvalidVolume(Milliliters(-2.0))
        );
        assert_eq!(axis.peak_effort(), 0.0);
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let axis = SimAxis::new(RATE);
        let config = PumpConfig {
            turns_to_ml: 0.0,
            ..PumpConfig::default()
        };
        let clock = LoopClock::from_config(&TimingConfig::default(), StopToken::new());
        assert!(matches!(
            Pump::new(axis.port(), config, clock),
            Err(MotionError::InvalidCalibration { name: "turns_to_ml", .. })
        ));
    }
}
