// Command loop with a single motion worker
// Note: the worker owns the AgBot, so at most one physical operation runs at a time.
// Stop requests skip the queue by tripping the shared stop token first; the running
// operation notices it at its next tick and zeroes its motors.

use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::agbot::{AgBot, AgBotParts, GantryStatus};
use crate::config::{
    AgBotConfig, COMMAND_QUEUE_DEPTH, LOOP_HZ, PARK_POSITION_MM, TELEMETRY_HZ, TOPIC_CMD,
    TOPIC_HEALTH, TOPIC_POSITION, TOPIC_REPLY,
};
use crate::messages::{Command, Reply, RuntimeHealth};
use crate::motion::{Bounds, Milliliters, Millimeters, Result, StopToken, Turns};
use crate::sim::{SIM_MAX_TURNS_PER_S, SimAxis, SimGantry, SimMoistureSensor};

/// Everything the composition root needs to bring the robot up
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: AgBotConfig,
    /// Workspace size persisted from an earlier calibration
    pub stored_bounds: Option<Bounds>,
    /// Simulated plant: workspace size and probe throw (mm)
    pub sim_width_mm: f64,
    pub sim_depth_mm: f64,
    pub sim_probe_throw_mm: f64,
    pub sim_moisture: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config: AgBotConfig::default(),
            stored_bounds: None,
            sim_width_mm: 385.0,
            sim_depth_mm: 265.0,
            sim_probe_throw_mm: 15.0,
            sim_moisture: 50.0,
        }
    }
}

/// What the worker last reported
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerState {
    pub status: GantryStatus,
    pub busy: bool,
}

pub struct Runtime {
    commands: mpsc::Sender<Command>,
    stop: StopToken,
    state: watch::Receiver<WorkerState>,
}

impl Runtime {
    pub fn new(
        commands: mpsc::Sender<Command>,
        stop: StopToken,
        state: watch::Receiver<WorkerState>,
    ) -> Self {
        Self {
            commands,
            stop,
            state,
        }
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: Command) {
        info!("Received command: {:?}", &cmd);
        if cmd == Command::Stop {
            // Abort whatever is running before the stop reaches the worker
            self.stop.trigger();
        }

        match self.commands.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Stop)) => {
                // Never drop a stop; the cancelled queue drains quickly
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let _ = commands.send(Command::Stop).await;
                });
            }
            Err(TrySendError::Full(cmd)) => {
                warn!("Command queue full, dropping {}", cmd.name());
            }
            Err(TrySendError::Closed(cmd)) => {
                warn!("Motion worker gone, dropping {}", cmd.name());
            }
        }
    }

    fn status(&self) -> GantryStatus {
        self.state.borrow().status
    }

    /// Compute health from the worker's last report
    fn health(&self) -> RuntimeHealth {
        let state = *self.state.borrow();
        if state.busy {
            RuntimeHealth::Busy
        } else if !state.status.homed {
            RuntimeHealth::Unhomed
        } else {
            RuntimeHealth::Ok
        }
    }
}

/// Wire the controllers to the simulated plant
pub fn simulated_agbot(options: &RunOptions) -> Result<AgBot> {
    let config = &options.config;
    let gantry = SimGantry::new(options.sim_width_mm, options.sim_depth_mm, config.xy.turns_to_mm());
    let (motor_a, motor_b) = gantry.motors();

    let half_throw = Turns(options.sim_probe_throw_mm / config.z.turns_to_mm() / 2.0);
    let lift = SimAxis::new(1.0).with_limits(-half_throw, half_throw);
    let pump = SimAxis::new(SIM_MAX_TURNS_PER_S);
    let sensor = SimMoistureSensor::new(options.sim_moisture).attached_to(&lift);

    let parts = AgBotParts {
        motor_a,
        motor_b,
        motor_z: lift.port(),
        motor_pump: pump.port(),
        sensor: Box::new(sensor),
    };
    AgBot::assemble(parts, config)
}

/// Home, install or measure the workspace, and park
async fn bring_up(agbot: &mut AgBot, stored: Option<Bounds>, force: bool) -> Result<Bounds> {
    let bounds = agbot.calibrate(stored, force).await?;
    let (x, y) = PARK_POSITION_MM;
    agbot.move_to(Millimeters(x), Millimeters(y)).await?;
    Ok(bounds)
}

/// Run one command to completion
pub async fn execute(agbot: &mut AgBot, cmd: &Command) -> Reply {
    let result = match cmd {
        Command::Stop => {
            agbot.stop();
            agbot.stop_token().clear();
            Ok(Reply::done(cmd))
        }
        Command::MoveTo { x, y } => agbot
            .move_to(Millimeters(*x), Millimeters(*y))
            .await
            .map(|_| Reply::done(cmd)),
        Command::MoveRelative { dx, dy } => agbot
            .move_relative(Millimeters(*dx), Millimeters(*dy))
            .await
            .map(|_| Reply::done(cmd)),
        Command::Probe => agbot.probe().await.map(|value| Reply::Reading { value }),
        Command::Home => agbot.home().await.map(|_| Reply::done(cmd)),
        Command::FindSize => agbot.find_size().await.map(Reply::from),
        Command::Recalibrate => bring_up(agbot, None, true).await.map(Reply::from),
        Command::MeasureThrow => agbot
            .measure_throw()
            .await
            .map(|throw| Reply::Throw { mm: throw.value() }),
        Command::Water { ml } => agbot.water(Milliliters(*ml)).await.map(|_| Reply::done(cmd)),
        Command::Purge => agbot.purge().await.map(|_| Reply::done(cmd)),
        Command::Tend(site) => agbot.tend(site).await.map(Reply::Tended),
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            agbot.stop();
            warn!("{} rejected: {}", cmd.name(), e);
            Reply::rejected(cmd, &e)
        }
    }
}

/// Motion worker: brings the robot up, then executes commands in order
pub async fn drive(
    mut agbot: AgBot,
    mut commands: mpsc::Receiver<Command>,
    replies: mpsc::Sender<Reply>,
    state: watch::Sender<WorkerState>,
    stored: Option<Bounds>,
) {
    let report = |agbot: &AgBot, busy: bool| {
        state.send_replace(WorkerState {
            status: agbot.status(),
            busy,
        });
    };

    report(&agbot, true);
    match bring_up(&mut agbot, stored, false).await {
        Ok(bounds) => info!("Gantry ready, workspace {} x {}", bounds.x_max, bounds.y_max),
        Err(e) => {
            agbot.stop();
            warn!("Startup calibration failed: {}", e);
        }
    }
    report(&agbot, false);

    while let Some(cmd) = commands.recv().await {
        report(&agbot, true);
        let reply = execute(&mut agbot, &cmd).await;
        debug!("Reply: {:?}", reply);
        if replies.send(reply).await.is_err() {
            break;
        }
        report(&agbot, false);
    }

    info!("Command channel closed, stopping motors");
    agbot.stop();
}

pub async fn run(options: RunOptions) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_reply = session.declare_publisher(TOPIC_REPLY).await?;
    let pub_position = session.declare_publisher(TOPIC_POSITION).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let agbot = simulated_agbot(&options)?;
    let stop = agbot.stop_token();
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (reply_tx, mut reply_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (state_tx, state_rx) = watch::channel(WorkerState::default());
    let worker = tokio::spawn(drive(agbot, cmd_rx, reply_tx, state_tx, options.stored_bounds));

    let mut runtime = Runtime::new(cmd_tx, stop, state_rx);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let telemetry_every = LOOP_HZ / TELEMETRY_HZ;
    let mut ticks: u64 = 0;

    info!(
        "Runtime started: {}Hz command loop, {}Hz telemetry",
        LOOP_HZ, TELEMETRY_HZ
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_REPLY, TOPIC_POSITION, TOPIC_HEALTH
    );

    loop {
        tick.tick().await;
        ticks += 1;

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Publish command outcomes
        while let Ok(reply) = reply_rx.try_recv() {
            pub_reply.put(serde_json::to_string(&reply)?).await?;
        }

        // 3. Publish position and health
        if ticks % telemetry_every == 0 {
            let position_json = serde_json::to_string(&runtime.status())?;
            pub_position.put(position_json).await?;
            let health_json = serde_json::to_string(&runtime.health())?;
            pub_health.put(health_json).await?;
        }

        if worker.is_finished() {
            return Err("motion worker exited".into());
        }
    }
}
