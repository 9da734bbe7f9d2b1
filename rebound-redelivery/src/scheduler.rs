//! Timer-driven resumption between redelivery attempts.
//!
//! Waiting never blocks a thread: the attempt loop awaits the scheduler,
//! handing control back to the runtime until the delay elapses.

use core::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// No async runtime is available to drive the timer.
    #[error("No async runtime available to schedule redelivery")]
    NoRuntime,

    /// The scheduler refused the request.
    #[error("Redelivery rejected by scheduler: {0}")]
    Rejected(String),
}

/// Waits out the delay before the next attempt
#[async_trait]
pub trait Scheduler: Send + Sync + Debug {
    /// Resolve once `delay` has elapsed.
    ///
    /// A zero delay must still yield so that other work can progress.
    ///
    /// # Errors
    ///
    /// If the delay cannot be scheduled at all. This is fatal for the exchange.
    async fn schedule(&self, delay: Duration) -> Result<(), SchedulingError>;
}

/// Sleeps on the tokio timer of the current runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, delay: Duration) -> Result<(), SchedulingError> {
        tokio::runtime::Handle::try_current().map_err(|_| SchedulingError::NoRuntime)?;

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }
}

/// Records requested delays and resumes immediately.
///
/// Used to observe backoff behaviour without waiting for it.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, delay: Duration) -> Result<(), SchedulingError> {
        self.delays.lock().push(delay);
        tokio::task::yield_now().await;
        Ok(())
    }
}
