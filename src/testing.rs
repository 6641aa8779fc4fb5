//! In-memory fakes for the pipeline's external capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::dispatch::{Channel, MessageSink, RetryPolicy};
use crate::error::{FeedError, SinkError};
use crate::facts::{Supplement, SupplementarySource};
use crate::feed::FilingFeed;
use crate::filings::{FilingRecord, PayloadRef};
use crate::format::NotificationPayload;

const STALL: Duration = Duration::from_secs(3600);

/// Retry policy with no waiting, for tests.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        attempt_timeout: Duration::from_secs(1),
    }
}

/// Feed with canned filings per day. Days without an entry are empty.
#[derive(Default)]
pub struct FakeFeed {
    days: HashMap<NaiveDate, Vec<FilingRecord>>,
    unavailable: bool,
    calls: Mutex<Vec<NaiveDate>>,
}

impl FakeFeed {
    pub fn with_day(mut self, date: NaiveDate, filings: Vec<FilingRecord>) -> Self {
        self.days.insert(date, filings);
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<NaiveDate> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FilingFeed for FakeFeed {
    async fn fetch_filings(&self, date: NaiveDate) -> Result<Vec<FilingRecord>, FeedError> {
        self.calls.lock().unwrap().push(date);
        if self.unavailable {
            return Err(FeedError::Status {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(self.days.get(&date).cloned().unwrap_or_default())
    }
}

/// Supplementary data keyed by payload reference; unknown references fail.
#[derive(Default)]
pub struct FakeSupplementSource {
    supplements: HashMap<String, Supplement>,
    stalled: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeSupplementSource {
    pub fn with(mut self, reference: &str, supplement: Supplement) -> Self {
        self.supplements.insert(reference.to_string(), supplement);
        self
    }

    /// Never answers.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SupplementarySource for FakeSupplementSource {
    async fn fetch(&self, reference: &PayloadRef) -> anyhow::Result<Supplement> {
        self.calls.lock().unwrap().push(reference.as_str().to_string());
        if self.stalled {
            tokio::time::sleep(STALL).await;
        }
        self.supplements
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no supplementary data for {}", reference.as_str()))
    }
}

/// Records deliveries; individual filings can be made to fail.
#[derive(Default)]
pub struct FakeSink {
    transient_failures: HashMap<String, u32>,
    rejected: HashSet<String>,
    stalling: HashSet<String>,
    attempts: Mutex<HashMap<String, u32>>,
    delivered: Mutex<Vec<NotificationPayload>>,
}

impl FakeSink {
    /// Fail the first `times` attempts for a filing with a transient error.
    pub fn failing_times(mut self, filing_id: &str, times: u32) -> Self {
        self.transient_failures.insert(filing_id.to_string(), times);
        self
    }

    /// Fail every attempt for a filing with a transient error.
    pub fn always_failing(self, filing_id: &str) -> Self {
        self.failing_times(filing_id, u32::MAX)
    }

    pub fn rejecting(mut self, filing_id: &str) -> Self {
        self.rejected.insert(filing_id.to_string());
        self
    }

    pub fn stalling(mut self, filing_id: &str) -> Self {
        self.stalling.insert(filing_id.to_string());
        self
    }

    pub fn attempts(&self, filing_id: &str) -> u32 {
        self.attempts.lock().unwrap().get(filing_id).copied().unwrap_or(0)
    }

    /// (channel, filing id) of every successful delivery, in order.
    pub fn delivered(&self) -> Vec<(Channel, String)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.channel, p.filing_id.clone()))
            .collect()
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for FakeSink {
    async fn deliver(&self, channel: Channel, payload: &NotificationPayload) -> Result<(), SinkError> {
        let id = payload.filing_id.as_str();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        if self.stalling.contains(id) {
            tokio::time::sleep(STALL).await;
        }
        if self.rejected.contains(id) {
            return Err(SinkError::Rejected {
                reason: "HTTP 400: Invalid Form Body".to_string(),
            });
        }
        if attempt <= self.transient_failures.get(id).copied().unwrap_or(0) {
            return Err(SinkError::transient("HTTP 503: upstream unavailable"));
        }

        let mut delivered = payload.clone();
        delivered.channel = channel;
        self.delivered.lock().unwrap().push(delivered);
        Ok(())
    }
}
