//! Reconnection policy shared by the main session and the broadcast listener.

use crate::errors::RconError;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

/// How hard to try to get a dropped connection back.
///
/// The first attempt is made immediately; later attempts wait for an
/// exponentially growing, jittered delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before giving up. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "super::config::millis")]
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    #[serde(with = "super::config::millis")]
    pub max_backoff: Duration,
    /// Factor the delay grows by after each attempt.
    pub multiplier: f64,
    /// Random extra delay, as a fraction (0.0 to 1.0) of the current delay.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Run `connect` until it succeeds or the attempts are used up.
    ///
    /// Authentication failures are returned straight away, a wrong password
    /// does not get better by retrying.
    ///
    /// # Errors
    /// Returns the error of the last attempt.
    pub async fn retry<T, F, Fut>(&self, mut connect: F) -> Result<T, RconError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RconError>>,
    {
        let mut backoff = ExponentialBackoff::from_policy(self);
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match connect().await {
                Ok(value) => return Ok(value),
                Err(err @ RconError::AuthFailed) => return Err(err),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "reconnect attempt {attempt}/{attempts} failed: {err}. retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub(crate) fn from_policy(policy: &ReconnectPolicy) -> Self {
        Self {
            current: policy.initial_backoff,
            max: policy.max_backoff,
            multiplier: if policy.multiplier.is_finite() {
                policy.multiplier.max(1.0)
            } else {
                1.0
            },
            jitter: if policy.jitter.is_finite() {
                policy.jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Get the next delay and advance the backoff.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);

        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = next.min(self.max);

        let jitter = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or_default())
    }
}
