pub mod backoff;

use std::cmp::min;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use tokio::time::Instant;
use crate::retry::backoff::{Backoff, ExponentialBackoff, FixedBackoff};

/// The longest timeout or maximum duration a policy may have. Timeouts returned by a [Backoff]
///  are capped to this as well.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24*60*60);

/// Retransmission parameters for all requests of one code. A policy is cheap to clone: the
///  backoff strategy is shared.
#[derive(Clone)]
pub struct RetryPolicy {
    /// the time to wait for a reply after the first transmission
    pub initial_timeout: Duration,
    /// the total number of transmissions, including the first
    pub max_attempts: u32,
    /// an optional upper bound on the time between the first transmission and giving up,
    ///  regardless of the number of attempts
    pub max_duration: Option<Duration>,
    pub backoff: Arc<dyn Backoff>,
}

impl Debug for RetryPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RetryPolicy{{initial:{:?}, max_attempts:{}, max_duration:{:?}, backoff:{:?}}}",
               self.initial_timeout, self.max_attempts, self.max_duration, self.backoff)
    }
}

impl RetryPolicy {
    pub fn fixed(initial_timeout: Duration, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_timeout,
            max_attempts,
            max_duration: None,
            backoff: Arc::new(FixedBackoff),
        }
    }

    /// RFC 5080 style: the timeout doubles after every attempt up to `max_timeout`, and the
    ///  request is given up after `max_attempts` transmissions or `max_duration`, whichever comes
    ///  first
    pub fn exponential(initial_timeout: Duration, max_timeout: Duration, max_attempts: u32, max_duration: Duration) -> RetryPolicy {
        RetryPolicy {
            initial_timeout,
            max_attempts,
            max_duration: Some(max_duration),
            backoff: Arc::new(ExponentialBackoff::doubling(max_timeout)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.initial_timeout.is_zero() {
            bail!("initial_timeout must be positive");
        }
        if self.initial_timeout > MAX_TIMEOUT {
            bail!("initial_timeout {:?} is longer than {:?}", self.initial_timeout, MAX_TIMEOUT);
        }
        if let Some(max_duration) = self.max_duration {
            if max_duration > MAX_TIMEOUT {
                bail!("max_duration {:?} is longer than {:?}", max_duration, MAX_TIMEOUT);
            }
            if max_duration < self.initial_timeout {
                bail!("max_duration {:?} is shorter than initial_timeout {:?}", max_duration, self.initial_timeout);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// send the request again, with the same identifier
    Retransmit,
    /// give up
    Exhausted,
}

/// The timing part of a request's state machine: `Sent(1) -> Sent(2) -> ... -> Exhausted`.
///
/// This is purely a function of the timestamps passed in - the owner keeps track of deadlines
///  and calls [RetryState::on_expiry] once the deadline is reached.
#[derive(Clone, Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    first_sent: Instant,
    timeout: Duration,
    deadline: Instant,
}

impl RetryState {
    /// the state after the first transmission at `now`
    pub fn start(policy: RetryPolicy, now: Instant) -> RetryState {
        let timeout = policy.initial_timeout;
        let mut result = RetryState {
            policy,
            attempt: 1,
            first_sent: now,
            timeout,
            deadline: now + timeout,
        };
        result.deadline = result.cap_deadline(result.deadline);
        result
    }

    /// the number of transmissions so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn first_sent(&self) -> Instant {
        self.first_sent
    }

    fn cap_deadline(&self, deadline: Instant) -> Instant {
        match self.policy.max_duration {
            Some(max_duration) => min(deadline, self.first_sent + max_duration),
            None => deadline,
        }
    }

    /// Decides what to do when the deadline was reached without a reply. On
    ///  [RetryDecision::Retransmit], the attempt counter and deadline are advanced, and the
    ///  caller is expected to actually send the request again.
    pub fn on_expiry(&mut self, now: Instant) -> RetryDecision {
        if self.attempt >= self.policy.max_attempts {
            return RetryDecision::Exhausted;
        }
        if let Some(max_duration) = self.policy.max_duration {
            if now >= self.first_sent + max_duration {
                return RetryDecision::Exhausted;
            }
        }

        self.attempt += 1;
        self.timeout = min(self.policy.backoff.next_timeout(self.policy.initial_timeout, self.timeout, self.attempt), MAX_TIMEOUT);
        self.deadline = self.cap_deadline(now + self.timeout);
        RetryDecision::Retransmit
    }
}
