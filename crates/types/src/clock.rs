use std::fmt;
use tokio::time::Instant;

/// Wall-clock source in unix seconds, shared by the orchestrator and chain drivers
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Wall clock anchored once and advanced by the tokio timer.
///
/// Under `tokio::time::pause` the reported time follows virtual time, so
/// deadline-driven flows can be exercised without real waiting.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_secs: u64,
    anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now())
    }

    pub fn starting_at(anchor_secs: u64) -> Self {
        Self {
            anchor_secs,
            anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        self.anchor_secs + self.anchor.elapsed().as_secs()
    }
}
