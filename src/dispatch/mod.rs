pub mod discord;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::classify::NotificationCategory;
use crate::error::{DeliveryFailed, SinkError};
use crate::format::NotificationPayload;

/// Outbound destinations. Earnings get their own channel; every other
/// notifiable category goes to news.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Earnings,
    News,
}

impl Channel {
    pub fn for_category(category: NotificationCategory) -> Self {
        match category {
            NotificationCategory::Earnings => Self::Earnings,
            _ => Self::News,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Earnings => "earnings",
            Self::News => "news",
        })
    }
}

/// A message endpoint that accepts one payload per call.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, channel: Channel, payload: &NotificationPayload) -> Result<(), SinkError>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ceiling for both computed backoff and server-requested waits.
    pub max_delay: Duration,
    /// A single attempt that takes longer counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

pub struct Dispatcher {
    sink: Arc<dyn MessageSink>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn MessageSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// Deliver a payload to its channel. Returns the number of attempts used.
    pub async fn send(&self, payload: &NotificationPayload) -> Result<u32, DeliveryFailed> {
        let channel = payload.channel;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.sink.deliver(channel, payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::transient(format!(
                    "no response within {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            let err = match outcome {
                Ok(()) => {
                    info!(filing_id = %payload.filing_id, %channel, attempt, "Notification delivered");
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= max_attempts {
                return Err(DeliveryFailed {
                    channel,
                    attempts: attempt,
                    last_error: err,
                });
            }
            let retry_after = match &err {
                SinkError::Transient { retry_after, .. } => *retry_after,
                SinkError::Rejected { .. } => None,
            };

            let delay = self.policy.delay_after(attempt, retry_after);
            warn!(
                filing_id = %payload.filing_id,
                %channel,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Delivery failed, retrying: {}",
                err
            );
            tokio::time::sleep(delay).await;
            debug!(filing_id = %payload.filing_id, attempt = attempt + 1, "Retrying delivery");
        }
    }
}
