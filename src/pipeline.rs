//! One polling cycle: fetch → filter → classify → extract → format →
//! dispatch → commit.
//!
//! Per-filing failures stay with the filing. Only an unavailable feed or a
//! failed commit aborts the run, and neither leaves partial state behind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::classify::{classify, NotificationCategory};
use crate::dispatch::Dispatcher;
use crate::error::{FeedError, RunError};
use crate::facts::FactExtractor;
use crate::feed::FilingFeed;
use crate::filings::{FilingId, FilingRecord};
use crate::format::format_notification;
use crate::store::{SentIdSet, SentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Filtering,
    Processing,
    Committing,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// When non-empty, only filings with one of these tickers are considered.
    pub ticker_filter: HashSet<String>,
    /// Prior days to try when the requested date has no filings.
    pub lookback_days: u32,
    /// Filings processed at once.
    pub concurrency: usize,
    pub fetch_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            ticker_filter: HashSet::new(),
            lookback_days: 4,
            concurrency: 1,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unclassified,
    Delivered,
    Failed,
}

/// What a completed run did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Day whose listing was processed; `None` if every day in the window was empty.
    pub feed_date: Option<NaiveDate>,
    pub fetched: usize,
    pub already_sent: usize,
    pub out_of_scope: usize,
    pub unclassified: usize,
    pub delivered: Vec<FilingId>,
    /// Withheld from the sent set; retried next run.
    pub failed: Vec<FilingId>,
}

pub struct Pipeline {
    feed: Arc<dyn FilingFeed>,
    extractor: FactExtractor,
    dispatcher: Dispatcher,
    store: Arc<dyn SentStore>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        feed: Arc<dyn FilingFeed>,
        extractor: FactExtractor,
        dispatcher: Dispatcher,
        store: Arc<dyn SentStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            feed,
            extractor,
            dispatcher,
            store,
            options,
        }
    }

    pub async fn run_once(&self, date: NaiveDate) -> Result<RunReport, RunError> {
        let mut sent = self.store.load().await?;
        if sent.is_empty() {
            info!(date = %date, "Run started with no filings recorded as sent");
        } else {
            info!(date = %date, known = sent.len(), "Run started");
        }

        enter(RunPhase::Fetching);
        let (feed_date, filings) = match self.fetch_window(date).await {
            Ok(found) => found,
            Err(e) => {
                error!(date = %date, "Feed unavailable, nothing processed: {}", e);
                enter(RunPhase::Idle);
                return Err(e.into());
            }
        };

        enter(RunPhase::Filtering);
        let mut report = RunReport {
            feed_date,
            fetched: filings.len(),
            ..Default::default()
        };
        let candidates = self.filter(filings, &sent, &mut report);

        enter(RunPhase::Processing);
        let concurrency = self.options.concurrency.max(1);
        let outcomes: Vec<(FilingId, Outcome)> = stream::iter(candidates)
            .map(|record| self.process(record))
            .buffered(concurrency)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Outcome::Unclassified => report.unclassified += 1,
                Outcome::Delivered => report.delivered.push(id),
                Outcome::Failed => report.failed.push(id),
            }
        }

        enter(RunPhase::Committing);
        if let Err(e) = self.commit(&mut sent, &report.delivered).await {
            error!(delivered = report.delivered.len(), "Could not record sent filings: {}", e);
            enter(RunPhase::Idle);
            return Err(e);
        }

        enter(RunPhase::Idle);
        info!(
            feed_date = ?report.feed_date,
            fetched = report.fetched,
            already_sent = report.already_sent,
            out_of_scope = report.out_of_scope,
            unclassified = report.unclassified,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Run complete"
        );
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some notifications were not delivered; they will be retried next run");
        }
        Ok(report)
    }

    /// Fetch `date`, falling back to earlier days while the listing is empty.
    async fn fetch_window(
        &self,
        date: NaiveDate,
    ) -> Result<(Option<NaiveDate>, Vec<FilingRecord>), FeedError> {
        for days_back in 0..=self.options.lookback_days {
            let day = date - chrono::Duration::days(days_back as i64);
            let filings = tokio::time::timeout(self.options.fetch_timeout, self.feed.fetch_filings(day))
                .await
                .map_err(|_| FeedError::Timeout(self.options.fetch_timeout))??;

            if !filings.is_empty() {
                if days_back > 0 {
                    info!(requested = %date, using = %day, "Using most recent day with filings");
                }
                return Ok((Some(day), filings));
            }
            debug!(date = %day, "No filings listed");
        }
        Ok((None, Vec::new()))
    }

    /// Drop filings already notified, repeated within the listing, or out of scope.
    fn filter(
        &self,
        filings: Vec<FilingRecord>,
        sent: &SentIdSet,
        report: &mut RunReport,
    ) -> Vec<FilingRecord> {
        let mut seen = HashSet::new();
        filings
            .into_iter()
            .filter(|filing| {
                if sent.contains(&filing.id) {
                    report.already_sent += 1;
                    return false;
                }
                if !seen.insert(filing.id.clone()) {
                    return false;
                }
                if !self.in_scope(filing) {
                    report.out_of_scope += 1;
                    return false;
                }
                true
            })
            .collect()
    }

    fn in_scope(&self, filing: &FilingRecord) -> bool {
        let filter = &self.options.ticker_filter;
        filter.is_empty()
            || filing
                .ticker
                .as_ref()
                .is_some_and(|ticker| filter.contains(ticker))
    }

    async fn process(&self, record: FilingRecord) -> (FilingId, Outcome) {
        let category = classify(&record);
        if !category.is_notifiable() {
            debug!(
                filing_id = %record.id,
                doc_type = record.document_type.as_tag(),
                title = %record.title,
                "Not notifiable"
            );
            return (record.id, Outcome::Unclassified);
        }

        let facts = if category == NotificationCategory::Earnings {
            Some(self.extractor.extract(&record).await)
        } else {
            None
        };
        let payload = format_notification(&record, category, facts.as_ref());

        match self.dispatcher.send(&payload).await {
            Ok(_) => {
                info!(filing_id = %record.id, %category, ticker = ?record.ticker, "Filing notified");
                (record.id, Outcome::Delivered)
            }
            Err(e) => {
                warn!(filing_id = %record.id, %category, "{}", e);
                (record.id, Outcome::Failed)
            }
        }
    }

    async fn commit(&self, sent: &mut SentIdSet, delivered: &[FilingId]) -> Result<(), RunError> {
        for id in delivered {
            sent.insert(id.clone());
        }
        self.store.commit(sent).await?;
        Ok(())
    }
}

fn enter(phase: RunPhase) {
    debug!(?phase, "Run phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Channel;
    use crate::facts::Supplement;
    use crate::filings::DocumentType;
    use crate::store::memory::MemorySentStore;
    use crate::testing::{fast_retry, FakeFeed, FakeSink, FakeSupplementSource};

    struct Harness {
        feed: Arc<FakeFeed>,
        sink: Arc<FakeSink>,
        store: Arc<MemorySentStore>,
        pipeline: Pipeline,
    }

    fn harness(
        feed: FakeFeed,
        source: FakeSupplementSource,
        sink: FakeSink,
        store: Arc<MemorySentStore>,
        options: PipelineOptions,
    ) -> Harness {
        let feed = Arc::new(feed);
        let sink = Arc::new(sink);
        let pipeline = Pipeline::new(
            feed.clone(),
            FactExtractor::new(Arc::new(source), Duration::from_secs(1)),
            Dispatcher::new(sink.clone(), fast_retry(3)),
            store.clone(),
            options,
        );
        Harness {
            feed,
            sink,
            store,
            pipeline,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 5).unwrap()
    }

    fn disclosure(id: &str, ticker: &str) -> FilingRecord {
        FilingRecord::new(id, DocumentType::ExtraordinaryReport, "臨時報告書")
            .with_ticker(ticker)
            .with_filer("テスト株式会社")
    }

    #[tokio::test]
    async fn test_end_to_end_earnings() {
        let filing = FilingRecord::new("F1", DocumentType::EarningsSummary, "Q2 Earnings").with_ticker("7203");
        let source = FakeSupplementSource::default().with(
            "7203",
            Supplement {
                items: vec![
                    ("totalRevenue".to_string(), "500000".to_string()),
                    ("netIncome".to_string(), "30000".to_string()),
                    ("totalDebt".to_string(), "unavailable".to_string()),
                ],
                ..Default::default()
            },
        );
        let h = harness(
            FakeFeed::default().with_day(day(), vec![filing]),
            source,
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["F1".to_string()]);
        assert_eq!(h.store.ids(), vec!["F1".to_string()]);

        let payloads = h.sink.payloads();
        assert_eq!(payloads.len(), 1);
        let payload = &payloads[0];
        assert_eq!(payload.channel, Channel::Earnings);
        assert!(payload.title.contains("7203"));
        let values: Vec<&str> = payload.fields.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["500,000円", "30,000円", "N/A"]);
    }

    #[tokio::test]
    async fn test_second_run_sends_nothing() {
        let filings = vec![disclosure("S1", "7203"), disclosure("S2", "6758")];
        let h = harness(
            FakeFeed::default().with_day(day(), filings),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let first = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(first.delivered.len(), 2);
        let second = h.pipeline.run_once(day()).await.unwrap();
        assert!(second.delivered.is_empty());
        assert_eq!(second.already_sent, 2);
        assert_eq!(h.sink.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_isolated_and_retried() {
        let filings = vec![
            disclosure("S1", "7203"),
            disclosure("S2", "6758"),
            disclosure("S3", "9984"),
        ];
        let store = Arc::new(MemorySentStore::new());
        let h = harness(
            FakeFeed::default().with_day(day(), filings.clone()),
            FakeSupplementSource::default(),
            FakeSink::default().always_failing("S2"),
            store.clone(),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["S1".to_string(), "S3".to_string()]);
        assert_eq!(report.failed, vec!["S2".to_string()]);
        assert_eq!(h.store.ids(), vec!["S1".to_string(), "S3".to_string()]);
        assert_eq!(h.sink.attempts("S2"), 3);

        // Next run with a healthy channel picks up only the failed filing.
        let healed = harness(
            FakeFeed::default().with_day(day(), filings),
            FakeSupplementSource::default(),
            FakeSink::default(),
            store,
            PipelineOptions::default(),
        );
        let report = healed.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["S2".to_string()]);
        assert_eq!(healed.store.ids().len(), 3);
    }

    #[tokio::test]
    async fn test_earnings_without_supplement_still_delivered() {
        let filing = FilingRecord::new("E1", DocumentType::EarningsSummary, "決算短信").with_ticker("4502");
        let h = harness(
            FakeFeed::default().with_day(day(), vec![filing]),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["E1".to_string()]);
        let payload = &h.sink.payloads()[0];
        assert_eq!(payload.fields.len(), 3);
        assert!(payload.fields.iter().all(|f| f.value == "N/A"));
    }

    #[tokio::test]
    async fn test_ticker_filter_drops_before_classification() {
        let options = PipelineOptions {
            ticker_filter: HashSet::from(["7203".to_string()]),
            ..Default::default()
        };
        let no_ticker = FilingRecord::new("S3", DocumentType::AnnualReport, "有価証券報告書");
        let h = harness(
            FakeFeed::default().with_day(
                day(),
                vec![disclosure("S1", "6758"), disclosure("S2", "7203"), no_ticker],
            ),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            options,
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.out_of_scope, 2);
        assert_eq!(report.delivered, vec!["S2".to_string()]);
        assert_eq!(h.sink.attempts("S1"), 0);
        assert_eq!(h.store.ids(), vec!["S2".to_string()]);
    }

    #[tokio::test]
    async fn test_unclassified_not_recorded() {
        let other = FilingRecord::new("X1", DocumentType::Other, "大量保有報告書").with_ticker("7203");
        let h = harness(
            FakeFeed::default().with_day(day(), vec![other]),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.unclassified, 1);
        assert!(h.sink.delivered().is_empty());
        assert!(h.store.ids().is_empty());
        assert_eq!(h.store.version(), 0);
    }

    #[tokio::test]
    async fn test_feed_unavailable_aborts_without_state_change() {
        let h = harness(
            FakeFeed::unavailable(),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let err = h.pipeline.run_once(day()).await.unwrap_err();
        assert!(matches!(err, RunError::FeedUnavailable(_)));
        assert_eq!(h.feed.calls(), vec![day()]);
        assert!(h.sink.delivered().is_empty());
        assert_eq!(h.store.version(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_run() {
        let h = harness(
            FakeFeed::default().with_day(day(), vec![disclosure("S1", "7203")]),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::failing()),
            PipelineOptions::default(),
        );

        let err = h.pipeline.run_once(day()).await.unwrap_err();
        assert!(matches!(err, RunError::Persistence(_)));
        assert!(h.store.ids().is_empty());
    }

    #[tokio::test]
    async fn test_empty_day_falls_back_to_previous() {
        let yesterday = day().pred_opt().unwrap();
        let h = harness(
            FakeFeed::default().with_day(yesterday, vec![disclosure("S1", "7203")]),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.feed_date, Some(yesterday));
        assert_eq!(report.delivered, vec!["S1".to_string()]);
        assert_eq!(h.feed.calls(), vec![day(), yesterday]);
    }

    #[tokio::test]
    async fn test_all_empty_window_is_not_an_error() {
        let options = PipelineOptions {
            lookback_days: 2,
            ..Default::default()
        };
        let h = harness(
            FakeFeed::default(),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            options,
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.feed_date, None);
        assert_eq!(report.fetched, 0);
        assert_eq!(h.feed.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_processing_commits_delivered_only() {
        let filings: Vec<FilingRecord> = (1..=6)
            .map(|i| disclosure(&format!("S{}", i), "7203"))
            .collect();
        let options = PipelineOptions {
            concurrency: 4,
            ..Default::default()
        };
        let h = harness(
            FakeFeed::default().with_day(day(), filings),
            FakeSupplementSource::default(),
            FakeSink::default().always_failing("S4").rejecting("S5"),
            Arc::new(MemorySentStore::new()),
            options,
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["S1", "S2", "S3", "S6"]);
        assert_eq!(report.failed, vec!["S4", "S5"]);
        assert_eq!(h.store.ids(), vec!["S1", "S2", "S3", "S6"]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_listing_sent_once() {
        let h = harness(
            FakeFeed::default().with_day(day(), vec![disclosure("S1", "7203"), disclosure("S1", "7203")]),
            FakeSupplementSource::default(),
            FakeSink::default(),
            Arc::new(MemorySentStore::new()),
            PipelineOptions::default(),
        );

        let report = h.pipeline.run_once(day()).await.unwrap();
        assert_eq!(report.delivered, vec!["S1".to_string()]);
        assert_eq!(h.sink.attempts("S1"), 1);
    }
}
