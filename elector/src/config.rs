use crate::{Error, Result};
use std::time::Duration;

/// Fixed delay between failed or denied acquire attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(300);

/// Upper bound of the random delay added on top of [`DEFAULT_BACKOFF`].
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Stores expire leases with millisecond precision.
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Longest lease accepted; deadlines past this are not representable everywhere.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Settings for one elector instance guarding one coordination key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectorConfig {
    /// Key in the lease store that all competing replicas contend for.
    pub key: String,
    /// Expiry attached to the lease on acquire and on every renew.
    pub ttl: Duration,
    /// Requested renew period. Use [`ElectorConfig::effective_renew_interval`]
    /// for the value the loop actually runs with.
    pub renew_interval: Duration,
    pub backoff: Duration,
    pub max_jitter: Duration,
    /// Bound on each store round trip. Defaults to the effective renew interval.
    pub op_timeout: Option<Duration>,
}

impl ElectorConfig {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
            renew_interval: ttl / 3,
            backoff: DEFAULT_BACKOFF,
            max_jitter: DEFAULT_MAX_JITTER,
            op_timeout: None,
        }
    }

    #[must_use]
    pub fn with_renew_interval(mut self, renew_interval: Duration) -> Self {
        self.renew_interval = renew_interval;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration, max_jitter: Duration) -> Self {
        self.backoff = backoff;
        self.max_jitter = max_jitter;
        self
    }

    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = Some(op_timeout);
        self
    }

    /// Renew period used by the election loop.
    ///
    /// A zero interval, or one that does not fit inside the ttl, is replaced
    /// by `ttl / 3` so a healthy leader gets at least two renew attempts per
    /// lease window.
    pub fn effective_renew_interval(&self) -> Duration {
        if self.renew_interval.is_zero() || self.renew_interval >= self.ttl {
            self.ttl / 3
        } else {
            self.renew_interval
        }
    }

    pub fn effective_op_timeout(&self) -> Duration {
        match self.op_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => self.effective_renew_interval(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl < MIN_TTL || self.ttl > MAX_TTL {
            return Err(Error::InvalidTtl);
        }
        if self.key.is_empty() {
            return Err(Error::InvalidKey);
        }
        Ok(())
    }
}
