//! Timeout enforcement.
//!
//! # Responsibilities
//! - Track the wall-clock budget of one request
//! - Enforce connect timeout, request timeout, body idle timeout
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Wall-clock budget of a single request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

/// Returned when a deadline passes before the guarded future completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub budget: Duration,
}

impl Deadline {
    /// Start a budget now.
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` within what is left of the budget. The future is dropped
    /// when the budget runs out, which cancels whatever it was doing.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Expired> {
        tokio::time::timeout_at(self.started + self.budget, fut)
            .await
            .map_err(|_| Expired {
                budget: self.budget,
            })
    }
}

/// Fires when a stream goes quiet for longer than its idle limit.
///
/// Poll it alongside the stream and call [`IdleTimer::reset`] whenever the
/// stream makes progress.
#[derive(Debug)]
pub struct IdleTimer {
    idle: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl IdleTimer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            sleep: Box::pin(tokio::time::sleep(idle)),
        }
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    /// Push the expiry out by a full idle period from now.
    pub fn reset(&mut self) {
        let next = Instant::now() + self.idle;
        self.sleep.as_mut().reset(next);
    }

    /// Ready once the idle limit has passed without a reset.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}
