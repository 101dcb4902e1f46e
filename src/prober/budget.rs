//! Attempt budget accounting for the ICMP retry loop.
//!
//! An overall timeout is split into attempts of at most
//! [`MAX_ATTEMPT_TIMEOUT`]. Each attempt that times out is charged its full
//! duration against the remaining budget; the probe fails once nothing is
//! left.

use std::time::Duration;
use tracing::warn;

use crate::error::{ProbeError, ProbeResult};

/// Default longest single attempt.
pub const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the next attempt, or `None` once the budget is spent.
pub fn next_attempt_timeout(remaining: Duration, max_attempt: Duration) -> Option<Duration> {
    if remaining.is_zero() || max_attempt.is_zero() {
        return None;
    }
    Some(remaining.min(max_attempt))
}

/// Validates a caller timeout and caps it at `max`.
pub fn clamp_timeout(timeout: Duration, max: Duration) -> ProbeResult<Duration> {
    if timeout.is_zero() {
        return Err(ProbeError::InvalidTimeout(timeout));
    }
    if timeout > max {
        warn!(
            requested_ms = timeout.as_millis() as u64,
            max_ms = max.as_millis() as u64,
            "probe timeout above maximum, clamping"
        );
        return Ok(max);
    }
    Ok(timeout)
}

/// One echo attempt: its sequence number and how long it may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub sequence: u16,
    pub timeout: Duration,
}

/// States of the retry loop.
#[derive(Debug)]
pub enum AttemptState {
    /// An attempt is ready to send.
    Attempting(Attempt),
    /// The attempt's deadline passed without a reply.
    TimedOutRetry(Attempt),
    /// A reply arrived; elapsed time since the probe began.
    Success(Duration),
    Failed(ProbeError),
}

/// Remaining budget of a single probe call.
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    overall: Duration,
    remaining: Duration,
    max_attempt: Duration,
    next_sequence: u16,
}

impl AttemptBudget {
    pub fn new(overall: Duration, max_attempt: Duration) -> Self {
        Self {
            overall,
            remaining: overall,
            max_attempt,
            next_sequence: 1,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// First state of the loop.
    pub fn begin(&mut self) -> AttemptState {
        self.next_state()
    }

    /// Charges a timed-out attempt and moves on.
    pub fn retry_after(&mut self, attempt: Attempt) -> AttemptState {
        self.remaining = self.remaining.saturating_sub(attempt.timeout);
        self.next_state()
    }

    fn next_state(&mut self) -> AttemptState {
        match next_attempt_timeout(self.remaining, self.max_attempt) {
            Some(timeout) => {
                let attempt = Attempt {
                    sequence: self.next_sequence,
                    timeout,
                };
                self.next_sequence = self.next_sequence.wrapping_add(1);
                AttemptState::Attempting(attempt)
            }
            None => AttemptState::Failed(ProbeError::Timeout {
                op: "icmp echo",
                elapsed: self.overall - self.remaining,
            }),
        }
    }
}
