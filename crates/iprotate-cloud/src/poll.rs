//! Deadline-bounded polling with exponential backoff, jitter and cancellation.

use std::future::Future;
use std::time::Duration;

use iprotate_core::FleetError;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Sleep after the first unsuccessful probe.
    pub initial: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Fraction of each sleep randomly added or removed (0 disables).
    pub jitter: f64,
    /// Total time budget, measured from the first probe.
    pub deadline: Duration,
}

impl PollPolicy {
    /// Constant interval without jitter.
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            initial: interval,
            multiplier: 1.0,
            max_interval: interval,
            jitter: 0.0,
            deadline,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_interval = max_interval.max(self.initial);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay before probe `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Ready(T),
    Pending,
}

/// Runs a probe until it reports [`PollStep::Ready`], the deadline passes or
/// the token is cancelled.
#[derive(Debug, Clone)]
pub struct Poller {
    what: String,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(what: impl Into<String>, policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            what: what.into(),
            policy,
            cancel,
        }
    }

    /// Probe errors end the wait immediately. A probe is always attempted at
    /// the deadline itself before giving up with [`FleetError::Timeout`].
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<T, FleetError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStep<T>, FleetError>>,
    {
        let deadline = Instant::now() + self.policy.deadline;
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FleetError::Cancelled(self.what.clone()));
            }
            if let PollStep::Ready(value) = probe().await? {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FleetError::Timeout {
                    what: self.what.clone(),
                    secs: self.policy.deadline.as_secs(),
                });
            }
            let delay = self.policy.jittered_delay(attempt).min(deadline - now);
            tracing::trace!(
                what = %self.what,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "poll pending"
            );
            sleep_or_cancel(&self.cancel, delay, &self.what).await?;
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    cancel: &CancellationToken,
    duration: Duration,
    what: &str,
) -> Result<(), FleetError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FleetError::Cancelled(what.to_string())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
