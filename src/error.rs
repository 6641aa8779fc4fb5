//! Typed failures of the notification pipeline.
//!
//! Only [`RunError`] aborts a run. Delivery failures are per filing and
//! extraction problems never surface as errors at all.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::Channel;

/// Fetch-level failure talking to the disclosure feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("feed reported status {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed feed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("feed did not answer within {0:?}")]
    Timeout(Duration),
}

/// Outcome of a single delivery attempt against an outbound channel.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Network errors, 5xx and rate limiting. Worth another attempt.
    #[error("transient delivery error: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// The endpoint refused the payload; retrying will not help.
    #[error("delivery rejected: {reason}")]
    Rejected { reason: String },
}

impl SinkError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A payload could not be delivered after the retry policy gave up.
#[derive(Debug, Error)]
#[error("delivery to {channel} channel failed after {attempts} attempt(s): {last_error}")]
pub struct DeliveryFailed {
    pub channel: Channel,
    pub attempts: u32,
    #[source]
    pub last_error: SinkError,
}

/// Failure reading or writing the durable sent-id set.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("store moved from version {expected} to {found} since the set was loaded")]
    Conflict { expected: u64, found: u64 },
}

/// Failures that abort a whole run. Nothing is marked as sent when one occurs.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("filing feed unavailable: {0}")]
    FeedUnavailable(#[from] FeedError),

    #[error("failed to persist sent filing ids: {0}")]
    Persistence(#[from] StoreError),
}
