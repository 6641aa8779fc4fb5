use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Supplement, SupplementarySource};
use crate::filings::PayloadRef;

const MODULES: &str = "price,assetProfile,financialData,incomeStatementHistory";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; filing-notifier/0.1)";
const MAX_CRUMB_LEN: usize = 64;

/// Quote-summary endpoint of Yahoo Finance, keyed by Tokyo listing code.
///
/// The endpoint needs a session cookie plus a matching crumb. Both are
/// fetched on first use and kept for the life of the source; a rejected
/// crumb is refreshed once.
pub struct YahooQuoteSource {
    client: reqwest::Client,
    base_url: String,
    cookie_url: String,
    crumb: Mutex<Option<String>>,
}

impl YahooQuoteSource {
    pub fn new(base_url: &str, cookie_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_url: cookie_url.to_string(),
            crumb: Mutex::new(None),
        })
    }

    fn endpoint(&self, reference: &PayloadRef) -> String {
        format!(
            "{}/v10/finance/quoteSummary/{}.T",
            self.base_url,
            reference.as_str()
        )
    }

    fn crumb_endpoint(&self) -> String {
        format!("{}/v1/test/getcrumb", self.base_url)
    }

    fn summary_request(&self, reference: &PayloadRef, crumb: &str) -> reqwest::Result<reqwest::Request> {
        self.client
            .get(self.endpoint(reference))
            .query(&[("modules", MODULES), ("crumb", crumb)])
            .build()
    }

    async fn crumb(&self) -> Result<String> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // Only the Set-Cookie matters here; the page itself is usually a 404.
        let resp = self
            .client
            .get(&self.cookie_url)
            .send()
            .await
            .context("Session cookie request failed")?;
        debug!(status = resp.status().as_u16(), "Quote session cookie requested");

        let resp = self
            .client
            .get(self.crumb_endpoint())
            .send()
            .await
            .context("Crumb request failed")?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read crumb")?;
        if !status.is_success() {
            bail!("crumb request returned HTTP {}", status.as_u16());
        }

        let crumb = parse_crumb(&body)?;
        info!("Quote session established");
        *cached = Some(crumb.clone());
        Ok(crumb)
    }

    async fn forget_crumb(&self) {
        *self.crumb.lock().await = None;
    }
}

#[async_trait]
impl SupplementarySource for YahooQuoteSource {
    async fn fetch(&self, reference: &PayloadRef) -> Result<Supplement> {
        let mut refreshed = false;
        loop {
            let crumb = self.crumb().await?;
            let request = self
                .summary_request(reference, &crumb)
                .context("Failed to build quote summary request")?;
            let resp = self
                .client
                .execute(request)
                .await
                .context("Quote summary request failed")?;

            let status = resp.status();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && !refreshed {
                debug!(reference = reference.as_str(), status = status.as_u16(), "Crumb rejected, refreshing session");
                self.forget_crumb().await;
                refreshed = true;
                continue;
            }

            let text = resp.text().await.context("Failed to read quote summary")?;
            if !status.is_success() {
                bail!("quote summary returned HTTP {}", status.as_u16());
            }

            let supplement = parse_quote_summary(&text)?;
            debug!(reference = reference.as_str(), items = supplement.items.len(), "Quote summary fetched");
            return Ok(supplement);
        }
    }
}

/// Validate a `getcrumb` response body. Error pages come back as HTML or
/// prose, so anything with whitespace or markup is refused.
pub fn parse_crumb(body: &str) -> Result<String> {
    let crumb = body.trim();
    if crumb.is_empty() {
        bail!("empty crumb");
    }
    if crumb.len() > MAX_CRUMB_LEN
        || crumb
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '{' | '}' | '"'))
    {
        bail!("unexpected crumb response: {}", crumb.chars().take(40).collect::<String>());
    }
    Ok(crumb.to_string())
}

/// Flatten a quote-summary document into a [`Supplement`].
pub fn parse_quote_summary(body: &str) -> Result<Supplement> {
    let json: Value = serde_json::from_str(body).context("Failed to parse quote summary JSON")?;

    let result = &json["quoteSummary"]["result"][0];
    if result.is_null() {
        let reason = json["quoteSummary"]["error"]["description"]
            .as_str()
            .unwrap_or("empty result");
        bail!("quote summary has no result: {}", reason);
    }

    let company = result["price"]["longName"]
        .as_str()
        .or_else(|| result["price"]["shortName"].as_str())
        .map(str::to_string);
    let sector = result["assetProfile"]["sector"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    // Latest annual statement comes first.
    let statement = &result["incomeStatementHistory"]["incomeStatementHistory"][0];
    let financial = &result["financialData"];

    let mut items = Vec::new();
    let mut push = |label: &str, value: &Value| {
        if let Some(raw) = raw_value(value) {
            items.push((label.to_string(), raw));
        }
    };
    push("totalRevenue", &statement["totalRevenue"]);
    push("totalRevenue", &financial["totalRevenue"]);
    push("netIncome", &statement["netIncome"]);
    push("totalDebt", &financial["totalDebt"]);

    Ok(Supplement {
        company,
        sector,
        fiscal_period: statement["endDate"]["fmt"].as_str().map(str::to_string),
        items,
    })
}

/// Yahoo wraps numbers as `{"raw": 123, "fmt": "123"}`; older payloads
/// carry bare numbers or strings.
fn raw_value(value: &Value) -> Option<String> {
    if let Some(n) = value["raw"].as_f64().or_else(|| value.as_f64()) {
        return Some(n.to_string());
    }
    value["fmt"]
        .as_str()
        .or_else(|| value.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
