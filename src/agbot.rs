// AgBot: XY gantry + probe lift + pump + soil moisture sensor
//
// Sequences the three controllers into the robot's operations and enforces the
// cross-axis rule that the gantry only travels with the probe raised.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AgBotConfig;
use crate::motion::{
    Actuator, Axis, Bounds, LoopClock, Milliliters, Millimeters, MotionError, Pump, Result,
    StopToken, XyMotion, ZMotion,
};

/// Soil moisture probe, read only while the probe is lowered
pub trait MoistureSensor: Send {
    fn read(&mut self) -> f64;
}

/// Position snapshot; z is the probe depth below the top stop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GantryPosition {
    pub x: Millimeters,
    pub y: Millimeters,
    pub z: Millimeters,
}

/// Telemetry snapshot, zeros while the gantry is unhomed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GantryStatus {
    pub homed: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Where to sense and where to water one plant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantSite {
    pub name: String,
    pub sense: (f64, f64),
    pub water: (f64, f64),
    /// Water when the reading is below this
    pub moisture_threshold: f64,
    pub ml_response: f64,
}

/// Result of tending one plant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TendReport {
    pub name: String,
    pub reading: f64,
    pub watered_ml: f64,
}

/// Hardware handed to [`AgBot::assemble`]
pub struct AgBotParts {
    pub motor_a: Actuator,
    pub motor_b: Actuator,
    pub motor_z: Actuator,
    pub motor_pump: Actuator,
    pub sensor: Box<dyn MoistureSensor>,
}

pub struct AgBot {
    xy: XyMotion,
    z: ZMotion,
    pump: Pump,
    sensor: Box<dyn MoistureSensor>,
    stop: StopToken,
}

impl AgBot {
    pub fn new(
        xy: XyMotion,
        z: ZMotion,
        pump: Pump,
        sensor: Box<dyn MoistureSensor>,
        stop: StopToken,
    ) -> Self {
        let mut agbot = Self {
            xy,
            z,
            pump,
            sensor,
            stop,
        };
        agbot.stop();
        agbot
    }

    /// Build every controller from one configuration, sharing one stop token
    pub fn assemble(parts: AgBotParts, config: &AgBotConfig) -> Result<Self> {
        config.validate()?;
        let stop = StopToken::new();
        let clock = LoopClock::from_config(&config.timing, stop.clone());
        let xy = XyMotion::new(parts.motor_a, parts.motor_b, config.xy.clone(), clock.clone())?;
        let z = ZMotion::new(parts.motor_z, config.z.clone(), clock.clone())?;
        let pump = Pump::new(parts.motor_pump, config.pump.clone(), clock)?;
        Ok(Self::new(xy, z, pump, parts.sensor, stop))
    }

    /// Token that aborts any running operation at its next tick
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn xy(&self) -> &XyMotion {
        &self.xy
    }

    pub fn z(&self) -> &ZMotion {
        &self.z
    }

    /// Zero every motor, in any state
    pub fn stop(&mut self) {
        self.xy.stop();
        self.z.stop();
        self.pump.stop();
    }

    /// Home Z, raise it, then home XY so the probe never drags while banging
    pub async fn home(&mut self) -> Result<()> {
        self.z.home().await?;
        self.raise().await?;
        self.xy.home().await
    }

    pub async fn find_size(&mut self) -> Result<Bounds> {
        self.raise().await?;
        self.xy.find_size().await
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.xy.set_bounds(bounds);
    }

    /// Home, then install stored bounds or measure new ones
    ///
    /// Bounds are measured when none are stored or when `force` is set. The
    /// returned bounds are what the caller should persist.
    pub async fn calibrate(&mut self, stored: Option<Bounds>, force: bool) -> Result<Bounds> {
        self.home().await?;
        let bounds = match stored {
            Some(bounds) if !force => {
                info!("Using stored gantry size {} x {}", bounds.x_max, bounds.y_max);
                self.xy.set_bounds(bounds);
                bounds
            }
            _ => {
                info!("Measuring gantry size");
                self.find_size().await?
            }
        };
        Ok(bounds)
    }

    pub async fn move_to(&mut self, x: Millimeters, y: Millimeters) -> Result<()> {
        info!("AgBot moving to ({}, {})", x, y);
        self.clear_probe().await?;
        self.xy.move_to(x, y).await
    }

    pub async fn move_relative(&mut self, dx: Millimeters, dy: Millimeters) -> Result<()> {
        self.clear_probe().await?;
        self.xy.move_relative(dx, dy).await
    }

    /// Lower the probe, read the soil, raise the probe
    pub async fn probe(&mut self) -> Result<f64> {
        let effort = self.z.config().travel_effort;
        self.z.down(effort).await?;
        let reading = self.sensor.read();
        info!("Moisture reading: {}", reading);
        self.z.up(effort).await?;
        Ok(reading)
    }

    /// Re-home the lift, lower it fully, and raise it again
    ///
    /// Returns how far the probe dropped below the top stop.
    pub async fn measure_throw(&mut self) -> Result<Millimeters> {
        let throw = self.z.measure_throw().await?;
        self.raise().await?;
        Ok(throw)
    }

    pub async fn water(&mut self, ml: Milliliters) -> Result<()> {
        self.pump.water(ml).await.map(|_| ())
    }

    pub async fn purge(&mut self) -> Result<()> {
        self.pump.purge().await.map(|_| ())
    }

    /// Probe a plant's soil and water it when the reading is below its threshold
    pub async fn tend(&mut self, site: &PlantSite) -> Result<TendReport> {
        info!("Tending {}", site.name);
        self.move_to(Millimeters(site.sense.0), Millimeters(site.sense.1))
            .await?;
        let reading = self.probe().await?;

        let mut watered_ml = 0.0;
        if reading < site.moisture_threshold {
            info!(
                "{} is dry ({} < {}), watering {} ml",
                site.name, reading, site.moisture_threshold, site.ml_response
            );
            self.move_to(Millimeters(site.water.0), Millimeters(site.water.1))
                .await?;
            self.water(Milliliters(site.ml_response)).await?;
            watered_ml = site.ml_response;
        }

        Ok(TendReport {
            name: site.name.clone(),
            reading,
            watered_ml,
        })
    }

    pub fn get_position(&self) -> Result<GantryPosition> {
        let (x, y) = self.xy.get_position()?;
        if !self.z.is_homed() {
            return Err(MotionError::NotHomed { axis: Axis::Z });
        }
        Ok(GantryPosition {
            x,
            y,
            z: self.z.get_position(),
        })
    }

    pub fn status(&self) -> GantryStatus {
        if !self.xy.is_homed() || !self.z.is_homed() {
            return GantryStatus::default();
        }
        match self.get_position() {
            Ok(position) => GantryStatus {
                homed: true,
                x: position.x.value(),
                y: position.y.value(),
                z: position.z.value(),
            },
            Err(_) => GantryStatus::default(),
        }
    }

    /// Raise the probe to the top stop
    async fn raise(&mut self) -> Result<()> {
        let effort = self.z.config().travel_effort;
        self.z.up(effort).await
    }

    /// Make sure the probe is clear of the soil before XY travel
    async fn clear_probe(&mut self) -> Result<()> {
        match self.z.check_clearance() {
            Ok(()) => Ok(()),
            Err(MotionError::UnsafeZHeight { offset, .. }) => {
                info!("Probe {} below top, raising before XY travel", offset);
                self.raise().await?;
                self.z.check_clearance().inspect_err(|e| {
                    warn!("Probe could not be raised, refusing to move: {}", e);
                })
            }
            Err(e) => {
                warn!("Refusing XY travel: {}", e);
                Err(e)
            }
        }
    }
}
