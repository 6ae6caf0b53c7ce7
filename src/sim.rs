// Simulated plant for running the controllers without hardware
//
// Motors respond to effort with a speed proportional to it and stop dead at
// hard stops, which is all stall-detection homing needs. Time comes from
// tokio's clock, so paused-time tests advance the plant deterministically.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::agbot::MoistureSensor;
use crate::motion::{
    Actuator, ActuatorPort, Millimeters, Ticks, Turns, belt_to_cartesian, cartesian_to_belt,
};

/// Encoder resolution of the simulated motors (XRP-style 585 counts per turn)
pub const SIM_COUNTS_PER_TURN: f64 = 585.0;

/// Shaft speed at full effort (turns/s)
pub const SIM_MAX_TURNS_PER_S: f64 = 2.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Velocity after a hard stop at [min, max] has had its say
fn blocked(position: f64, velocity: f64, min: f64, max: f64) -> f64 {
    if (position <= min && velocity < 0.0) || (position >= max && velocity > 0.0) {
        0.0
    } else {
        velocity
    }
}

fn quantize(turns: f64) -> Turns {
    Ticks::from_turns(Turns(turns), SIM_COUNTS_PER_TURN).to_turns(SIM_COUNTS_PER_TURN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Belt {
    A,
    B,
}

#[derive(Debug)]
struct GantryPlant {
    // Carriage position in workspace millimeters, (0, 0) is the homing corner
    x: f64,
    y: f64,
    width: f64,
    depth: f64,
    // Belt coordinates at power-on, so encoders start at zero
    origin: (Millimeters, Millimeters),
    mm_per_turn: f64,
    max_rate: f64,
    efforts: [f64; 2],
    peak: f64,
    last: Instant,
}

impl GantryPlant {
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        let (vx, vy) = self.carriage_velocity();
        self.x = (self.x + vx * dt).clamp(0.0, self.width);
        self.y = (self.y + vy * dt).clamp(0.0, self.depth);
        self.last = now;
    }

    fn carriage_velocity(&self) -> (f64, f64) {
        let va = Millimeters(self.efforts[0] * self.max_rate * self.mm_per_turn);
        let vb = Millimeters(self.efforts[1] * self.max_rate * self.mm_per_turn);
        let (vx, vy) = belt_to_cartesian(va, vb);
        (
            blocked(self.x, vx.value(), 0.0, self.width),
            blocked(self.y, vy.value(), 0.0, self.depth),
        )
    }

    fn belt_position(&self, belt: Belt) -> Turns {
        let (a, b) = cartesian_to_belt(Millimeters(self.x), Millimeters(self.y));
        let travel = match belt {
            Belt::A => a - self.origin.0,
            Belt::B => b - self.origin.1,
        };
        quantize(travel.value() / self.mm_per_turn)
    }

    fn belt_velocity(&self, belt: Belt) -> f64 {
        let (vx, vy) = self.carriage_velocity();
        let (va, vb) = cartesian_to_belt(Millimeters(vx), Millimeters(vy));
        let v = match belt {
            Belt::A => va,
            Belt::B => vb,
        };
        v.value() / self.mm_per_turn
    }
}

/// Coupled two-belt gantry with hard stops at the workspace edges
#[derive(Debug, Clone)]
pub struct SimGantry {
    plant: Arc<Mutex<GantryPlant>>,
}

impl SimGantry {
    /// Create a `width` x `depth` mm workspace with the carriage in the middle
    pub fn new(width_mm: f64, depth_mm: f64, mm_per_turn: f64) -> Self {
        let plant = GantryPlant {
            x: width_mm / 2.0,
            y: depth_mm / 2.0,
            width: width_mm,
            depth: depth_mm,
            origin: cartesian_to_belt(Millimeters(width_mm / 2.0), Millimeters(depth_mm / 2.0)),
            mm_per_turn,
            max_rate: SIM_MAX_TURNS_PER_S,
            efforts: [0.0; 2],
            peak: 0.0,
            last: Instant::now(),
        };
        Self {
            plant: Arc::new(Mutex::new(plant)),
        }
    }

    /// Power on with the carriage somewhere else
    pub fn with_carriage(self, x_mm: f64, y_mm: f64) -> Self {
        {
            let mut plant = lock(&self.plant);
            plant.x = x_mm.clamp(0.0, plant.width);
            plant.y = y_mm.clamp(0.0, plant.depth);
            plant.origin = cartesian_to_belt(Millimeters(plant.x), Millimeters(plant.y));
        }
        self
    }

    /// Ports for motor A and motor B
    pub fn motors(&self) -> (Actuator, Actuator) {
        (
            Box::new(SimBeltMotor {
                plant: Arc::clone(&self.plant),
                belt: Belt::A,
            }),
            Box::new(SimBeltMotor {
                plant: Arc::clone(&self.plant),
                belt: Belt::B,
            }),
        )
    }

    /// Physical carriage position (mm from the homing corner)
    pub fn carriage(&self) -> (f64, f64) {
        let mut plant = lock(&self.plant);
        plant.advance();
        (plant.x, plant.y)
    }

    pub fn belt_positions(&self) -> (Turns, Turns) {
        let mut plant = lock(&self.plant);
        plant.advance();
        (plant.belt_position(Belt::A), plant.belt_position(Belt::B))
    }

    pub fn efforts(&self) -> [f64; 2] {
        lock(&self.plant).efforts
    }

    /// Largest effort magnitude commanded on either motor since the last reset
    pub fn peak_effort(&self) -> f64 {
        lock(&self.plant).peak
    }

    pub fn reset_peak_effort(&self) {
        lock(&self.plant).peak = 0.0;
    }
}

struct SimBeltMotor {
    plant: Arc<Mutex<GantryPlant>>,
    belt: Belt,
}

impl ActuatorPort for SimBeltMotor {
    fn get_position(&self) -> Turns {
        let mut plant = lock(&self.plant);
        plant.advance();
        plant.belt_position(self.belt)
    }

    fn get_velocity(&self) -> f64 {
        let mut plant = lock(&self.plant);
        plant.advance();
        plant.belt_velocity(self.belt)
    }

    fn set_effort(&mut self, effort: f64) {
        let mut plant = lock(&self.plant);
        plant.advance();
        let index = match self.belt {
            Belt::A => 0,
            Belt::B => 1,
        };
        plant.efforts[index] = effort;
        plant.peak = plant.peak.max(effort.abs());
    }
}

#[derive(Debug)]
struct AxisPlant {
    position: f64,
    limits: (f64, f64),
    max_rate: f64,
    effort: f64,
    peak: f64,
    last: Instant,
}

impl AxisPlant {
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        let (min, max) = self.limits;
        self.position = (self.position + self.velocity() * dt).clamp(min, max);
        self.last = now;
    }

    fn velocity(&self) -> f64 {
        let (min, max) = self.limits;
        blocked(self.position, self.effort * self.max_rate, min, max)
    }
}

/// Single motor, optionally between two hard stops (probe lift, pump)
#[derive(Debug, Clone)]
pub struct SimAxis {
    plant: Arc<Mutex<AxisPlant>>,
}

impl SimAxis {
    /// Free-running motor starting at zero turns
    pub fn new(max_turns_per_s: f64) -> Self {
        let plant = AxisPlant {
            position: 0.0,
            limits: (f64::NEG_INFINITY, f64::INFINITY),
            max_rate: max_turns_per_s,
            effort: 0.0,
            peak: 0.0,
            last: Instant::now(),
        };
        Self {
            plant: Arc::new(Mutex::new(plant)),
        }
    }

    /// Hard stops at `min` and `max`; the start position is clamped into them
    pub fn with_limits(self, min: Turns, max: Turns) -> Self {
        self.set_limits(min, max);
        self
    }

    /// Move the hard stops on a running axis, shared by every port and clone
    pub fn set_limits(&self, min: Turns, max: Turns) {
        let mut plant = lock(&self.plant);
        plant.advance();
        plant.limits = (min.value(), max.value());
        plant.position = plant.position.clamp(min.value(), max.value());
    }

    pub fn port(&self) -> Actuator {
        Box::new(self.clone())
    }

    /// Unquantized shaft position
    pub fn position(&self) -> Turns {
        let mut plant = lock(&self.plant);
        plant.advance();
        Turns(plant.position)
    }

    pub fn effort(&self) -> f64 {
        lock(&self.plant).effort
    }

    pub fn peak_effort(&self) -> f64 {
        lock(&self.plant).peak
    }

    pub fn reset_peak_effort(&self) {
        lock(&self.plant).peak = 0.0;
    }
}

impl ActuatorPort for SimAxis {
    fn get_position(&self) -> Turns {
        let mut plant = lock(&self.plant);
        plant.advance();
        quantize(plant.position)
    }

    fn get_velocity(&self) -> f64 {
        let mut plant = lock(&self.plant);
        plant.advance();
        plant.velocity()
    }

    fn set_effort(&mut self, effort: f64) {
        let mut plant = lock(&self.plant);
        plant.advance();
        plant.effort = effort;
        plant.peak = plant.peak.max(effort.abs());
    }
}

/// Soil probe returning a settable reading
///
/// When attached to the lift it records the lift position at every read.
#[derive(Debug, Clone)]
pub struct SimMoistureSensor {
    reading: Arc<Mutex<f64>>,
    lift: Option<SimAxis>,
    reads: Arc<Mutex<Vec<Turns>>>,
}

impl SimMoistureSensor {
    pub fn new(reading: f64) -> Self {
        Self {
            reading: Arc::new(Mutex::new(reading)),
            lift: None,
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attached_to(mut self, lift: &SimAxis) -> Self {
        self.lift = Some(lift.clone());
        self
    }

    pub fn set_reading(&self, reading: f64) {
        *lock(&self.reading) = reading;
    }

    /// Lift positions at each read (empty when detached)
    pub fn read_positions(&self) -> Vec<Turns> {
        lock(&self.reads).clone()
    }
}

impl MoistureSensor for SimMoistureSensor {
    fn read(&mut self) -> f64 {
        if let Some(lift) = &self.lift {
            lock(&self.reads).push(lift.position());
        }
        *lock(&self.reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_gantry_stops_at_minus_x_edge() {
        let gantry = SimGantry::new(300.0, 200.0, 9.0).with_carriage(10.0, 50.0);
        let (mut a, mut b) = gantry.motors();
        // Both motors positive drive -X
        a.set_effort(1.0);
        b.set_effort(1.0);
        sleep(Duration::from_secs(5)).await;

        let (x, y) = gantry.carriage();
        assert_eq!(x, 0.0);
        assert!((y - 50.0).abs() < 1e-9);
        assert_eq!(a.get_velocity(), 0.0);
        assert_eq!(b.get_velocity(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoders_track_belt_travel() {
        let gantry = SimGantry::new(300.0, 200.0, 9.0).with_carriage(100.0, 100.0);
        let (mut a, mut b) = gantry.motors();
        assert_eq!(a.get_position(), Turns(0.0));
        a.set_effort(-0.5);
        b.set_effort(-0.5);
        sleep(Duration::from_secs(1)).await;
        a.set_effort(0.0);
        b.set_effort(0.0);

        // 1 turn on each belt backwards is 9 mm of +X
        let (pa, pb) = gantry.belt_positions();
        assert!((pa.value() + 1.0).abs() < 0.01, "belt A at {}", pa);
        assert!((pb.value() + 1.0).abs() < 0.01, "belt B at {}", pb);
        let (x, _) = gantry.carriage();
        assert!((x - 109.0).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_axis_stalls_at_limit() {
        let axis = SimAxis::new(1.0).with_limits(Turns(-0.5), Turns(0.5));
        let mut port = axis.port();
        port.set_effort(1.0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(axis.position(), Turns(0.5));
        assert_eq!(port.get_velocity(), 0.0);
        assert_eq!(axis.peak_effort(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_limits_jams_running_axis() {
        let axis = SimAxis::new(1.0);
        let mut port = axis.port();
        axis.set_limits(Turns(0.25), Turns(0.25));
        assert_eq!(axis.position(), Turns(0.25));

        port.set_effort(-1.0);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(axis.position(), Turns(0.25));
        assert_eq!(port.get_velocity(), 0.0);
    }

    #[test]
    fn test_sensor_records_lift_position() {
        let lift = SimAxis::new(1.0);
        let mut sensor = SimMoistureSensor::new(42.0).attached_to(&lift);
        assert_eq!(sensor.read(), 42.0);
        sensor.set_reading(7.5);
        assert_eq!(sensor.read(), 7.5);
        assert_eq!(sensor.read_positions().len(), 2);
    }
}
