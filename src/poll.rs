//! Fixed-interval polling.
//!
//! Every wait in a deployment (fulfillment, reachability, sentinel checks)
//! goes through [`poll_until`] with a [`RetryPolicy`]. The interval is fixed:
//! no exponential growth, no jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of probes. `None` polls forever.
    pub max_attempts: Option<u32>,
    /// Sleep between consecutive probes.
    pub interval: Duration,
    /// Wall-clock cut-off. Checked before every probe.
    pub deadline: Option<Instant>,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            interval,
            deadline: None,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
            deadline: None,
        }
    }

    /// Build from a raw attempt count where `0` means unbounded.
    pub fn from_parts(max_attempts: u32, interval: Duration) -> Self {
        if max_attempts == 0 {
            Self::unbounded(interval)
        } else {
            Self::bounded(max_attempts, interval)
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }

    /// Total time a bounded policy may spend sleeping, for narration.
    pub fn budget(&self) -> Option<Duration> {
        self.max_attempts
            .map(|n| self.interval * n.saturating_sub(1))
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max_attempts {
            Some(n) => write!(f, "{} attempts every {}s", n, self.interval.as_secs()),
            None => write!(f, "every {}s until ready", self.interval.as_secs()),
        }
    }
}

/// Result of a single probe.
#[derive(Debug)]
pub enum Probe<T, E> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet. Carries a short reason for the log line.
    NotYet(String),
    /// A terminal condition; polling stops immediately.
    Fail(E),
}

/// Result of a whole polling loop.
#[derive(Debug)]
pub enum PollResult<T, E> {
    Ready { value: T, attempts: u32 },
    Failed { error: E, attempts: u32 },
    /// Bounded policy ran out of attempts.
    Exhausted { attempts: u32 },
    /// The policy deadline passed.
    TimedOut { attempts: u32 },
}

impl<T, E> PollResult<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::TimedOut { attempts } => *attempts,
        }
    }
}

/// Run `probe` until it reports ready or failed, or the policy gives up.
///
/// The probe receives the 1-based attempt number. Sleeps happen only
/// between probes, never after the final one.
pub async fn poll_until<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut probe: F) -> PollResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Probe<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        if let Some(deadline) = policy.deadline
            && Instant::now() >= deadline
        {
            tracing::warn!(label, attempts = attempt, "Deadline reached while polling");
            return PollResult::TimedOut { attempts: attempt };
        }

        attempt += 1;
        match probe(attempt).await {
            Probe::Ready(value) => {
                tracing::debug!(label, attempt, "Poll condition met");
                return PollResult::Ready {
                    value,
                    attempts: attempt,
                };
            }
            Probe::Fail(error) => {
                return PollResult::Failed {
                    error,
                    attempts: attempt,
                };
            }
            Probe::NotYet(reason) => match policy.max_attempts {
                Some(max) => {
                    tracing::info!("{label}: {reason} (attempt {attempt}/{max})");
                    if attempt >= max {
                        return PollResult::Exhausted { attempts: attempt };
                    }
                }
                None => tracing::info!("{label}: {reason} (attempt {attempt})"),
            },
        }

        tokio::time::sleep(policy.interval).await;
    }
}
