//! Expiration policies for automatic removal of idle handles

use std::time::{Duration, Instant};

use crate::handle::HandleMetadata;

/// Decides whether an idle handle should be evicted.
///
/// The pool's background worker periodically sweeps the idle set, oldest
/// first, and destroys every handle the policy marks as expired. Policies see
/// read-only metadata and must behave as pure functions of it; they are never
/// invoked while the pool's internal lock is held.
pub trait ExpirationPolicy: Send + Sync + 'static {
    /// `true` if the idle handle described by `metadata` should be destroyed.
    fn should_evict(&self, metadata: &HandleMetadata, now: Instant) -> bool;

    /// Delay before the next eviction sweep.
    fn next_check_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Evicts handles that have not been claimed within a fixed window.
///
/// Handles that were never claimed are measured from their allocation
/// instant.
///
/// # Examples
///
/// ```
/// use genpool::{IdleTimeoutPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new(10)
///     .with_expiration_policy(IdleTimeoutPolicy::new(Duration::from_secs(300)));
/// ```
#[derive(Debug, Clone)]
pub struct IdleTimeoutPolicy {
    max_idle: Duration,
    check_interval: Duration,
}

impl IdleTimeoutPolicy {
    /// Evict handles whose last claim lies more than `max_idle` in the past.
    pub fn new(max_idle: Duration) -> Self {
        Self {
            max_idle,
            check_interval: Duration::from_secs(1),
        }
    }

    /// Set the sweep interval of the background worker.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

impl ExpirationPolicy for IdleTimeoutPolicy {
    fn should_evict(&self, metadata: &HandleMetadata, now: Instant) -> bool {
        let anchor = metadata.last_claimed_at().unwrap_or_else(|| metadata.created_at());
        now.saturating_duration_since(anchor) > self.max_idle
    }

    fn next_check_delay(&self) -> Duration {
        self.check_interval
    }
}

/// Evicts handles older than a fixed lifetime, regardless of use.
#[derive(Debug, Clone)]
pub struct TimeToLivePolicy {
    max_lifetime: Duration,
    check_interval: Duration,
}

impl TimeToLivePolicy {
    /// Evict handles allocated more than `max_lifetime` ago.
    pub fn new(max_lifetime: Duration) -> Self {
        Self {
            max_lifetime,
            check_interval: Duration::from_secs(1),
        }
    }

    /// Set the sweep interval of the background worker.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

impl ExpirationPolicy for TimeToLivePolicy {
    fn should_evict(&self, metadata: &HandleMetadata, now: Instant) -> bool {
        now.saturating_duration_since(metadata.created_at()) > self.max_lifetime
    }

    fn next_check_delay(&self) -> Duration {
        self.check_interval
    }
}
