use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use tracing::Level;

use crate::dispatch::RetryPolicy;
use crate::pipeline::PipelineOptions;

const DEFAULT_EDINET_URL: &str = "https://api.edinet-fsa.go.jp/api/v2";
const DEFAULT_QUOTE_URL: &str = "https://query2.finance.yahoo.com";
const DEFAULT_QUOTE_COOKIE_URL: &str = "https://fc.yahoo.com";

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub earnings_webhook: String,
    pub news_webhook: String,
    pub edinet_base_url: String,
    pub edinet_api_key: Option<String>,
    pub quote_base_url: String,
    /// Page whose response sets the quote session cookie.
    pub quote_cookie_url: String,
    pub store_dir: PathBuf,
    pub ticker_filter: HashSet<String>,
    pub lookback_days: u32,
    /// Overrides the business date derived from the clock.
    pub run_date: Option<NaiveDate>,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub feed_timeout: Duration,
    pub facts_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("{} required", key));

        let webhook_timeout = Duration::from_secs(parse_or(&get, "WEBHOOK_TIMEOUT_SECS", 15)?);
        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "DELIVERY_MAX_ATTEMPTS", 3u32)?.max(1),
            base_delay: Duration::from_millis(parse_or(&get, "DELIVERY_BACKOFF_MS", 1000)?),
            max_delay: Duration::from_millis(parse_or(&get, "DELIVERY_MAX_BACKOFF_MS", 30_000)?),
            attempt_timeout: webhook_timeout,
        };

        let ticker_filter = get("TICKER_FILTER")
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let run_date = get("RUN_DATE")
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .with_context(|| format!("RUN_DATE must be YYYY-MM-DD, got {:?}", raw))
            })
            .transpose()?;

        Ok(Self {
            earnings_webhook: require("DISCORD_EARNINGS_WEBHOOK")?,
            news_webhook: require("DISCORD_NEWS_WEBHOOK")?,
            edinet_base_url: get("EDINET_BASE_URL").unwrap_or_else(|| DEFAULT_EDINET_URL.to_string()),
            edinet_api_key: get("EDINET_API_KEY"),
            quote_base_url: get("QUOTE_BASE_URL").unwrap_or_else(|| DEFAULT_QUOTE_URL.to_string()),
            quote_cookie_url: get("QUOTE_COOKIE_URL").unwrap_or_else(|| DEFAULT_QUOTE_COOKIE_URL.to_string()),
            store_dir: PathBuf::from(get("SENT_STORE_DIR").unwrap_or_else(|| "./data/sent".to_string())),
            ticker_filter,
            lookback_days: parse_or(&get, "FEED_LOOKBACK_DAYS", 4)?,
            run_date,
            retry,
            concurrency: parse_or(&get, "DISPATCH_CONCURRENCY", 1usize)?.max(1),
            feed_timeout: Duration::from_secs(parse_or(&get, "FEED_TIMEOUT_SECS", 30)?),
            facts_timeout: Duration::from_secs(parse_or(&get, "FACTS_TIMEOUT_SECS", 20)?),
            log_level: parse_or(&get, "LOG_LEVEL", Level::INFO)?,
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            ticker_filter: self.ticker_filter.clone(),
            lookback_days: self.lookback_days,
            concurrency: self.concurrency,
            fetch_timeout: self.feed_timeout,
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{} has invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
