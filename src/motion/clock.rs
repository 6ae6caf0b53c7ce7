// Tick pacing and cancellation for control loops
//
// Control loops only suspend inside LoopClock, so every suspension point is
// also the place where stop requests and the optional timeout are observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use super::error::{MotionError, Result};
use crate::config::TimingConfig;

/// Shared stop request flag
///
/// Cloned into every controller; triggering it makes any running loop zero
/// its efforts at the next tick and return `MotionError::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Re-arm after the stop has been handled
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fixed-period pacing shared by the bang, point-move and dispense loops
#[derive(Debug, Clone)]
pub struct LoopClock {
    tick: Duration,
    settle: Duration,
    timeout: Option<Duration>,
    stop: StopToken,
}

impl LoopClock {
    pub fn new(tick: Duration, settle: Duration, timeout: Option<Duration>, stop: StopToken) -> Self {
        Self {
            tick,
            settle,
            timeout,
            stop,
        }
    }

    pub fn from_config(timing: &TimingConfig, stop: StopToken) -> Self {
        Self::new(timing.tick(), timing.settle(), timing.timeout(), stop)
    }

    /// Suspend for one tick, then report stop requests and overruns
    pub async fn wait_tick(&self, operation: &'static str, started: Instant) -> Result<()> {
        sleep(self.tick).await;
        self.check(operation, started)
    }

    /// Suspend for the settle period before stall polling starts
    pub async fn settle(&self, operation: &'static str, started: Instant) -> Result<()> {
        sleep(self.settle).await;
        self.check(operation, started)
    }

    fn check(&self, operation: &'static str, started: Instant) -> Result<()> {
        if self.stop.is_triggered() {
            debug!("{} observed stop request", operation);
            return Err(MotionError::Cancelled { operation });
        }
        if let Some(limit) = self.timeout {
            if started.elapsed() > limit {
                return Err(MotionError::Timeout { operation, limit });
            }
        }
        Ok(())
    }
}
