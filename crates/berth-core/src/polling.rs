//! Bounded polling with a fixed inter-cycle delay.
//!
//! The retry policy lives here once and is shared by the initial health
//! verification and the post-remediation re-verification. A [`Poller`] hands
//! out numbered cycles, sleeping `delay` between them, until either the
//! caller stops asking or `max_attempts` cycles have been handed out.
//!
//! Cancellation is only observed between cycles (before a cycle starts and
//! during the sleep), so a cycle is never abandoned half way. Shutdown takes
//! precedence over exhaustion: a caller that asks again after the final
//! cycle learns about a shutdown that fired during it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::{DeployError, Result};

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Sending half of a shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger/handle pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A handle that never fires.
    pub fn never() -> Self {
        shutdown_channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires. Pends forever if the trigger is dropped.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// One numbered poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    /// 1-based.
    pub number: u32,
    pub is_final: bool,
}

/// Hands out at most `max_attempts` cycles separated by `delay`.
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    shutdown: Shutdown,
    issued: u32,
}

impl Poller {
    pub fn new(policy: PollPolicy, shutdown: Shutdown) -> Self {
        Self {
            policy,
            shutdown,
            issued: 0,
        }
    }

    /// Wait out the delay (not before the first cycle) and return the next
    /// cycle, or `None` once the budget is spent.
    ///
    /// Fails with `DeployError::Cancelled` if shutdown has fired, even when
    /// the budget is already spent.
    pub async fn next_cycle(&mut self) -> Result<Option<Cycle>> {
        if self.shutdown.is_triggered() {
            return Err(DeployError::Cancelled);
        }
        if self.issued >= self.policy.max_attempts {
            return Ok(None);
        }

        if self.issued > 0 {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                _ = shutdown.cancelled() => return Err(DeployError::Cancelled),
            }
        }

        self.issued += 1;
        Ok(Some(Cycle {
            number: self.issued,
            is_final: self.issued == self.policy.max_attempts,
        }))
    }
}
