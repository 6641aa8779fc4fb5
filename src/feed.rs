use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::filings::{jst_to_utc, DocumentType, FilingRecord};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const DOCUMENT_LINK_BASE: &str = "https://disclosure2.edinet-fsa.go.jp/WZEK0040.aspx?S1";

/// Source of filings submitted on a given business day.
#[async_trait]
pub trait FilingFeed: Send + Sync {
    /// An empty day is `Ok(vec![])`, never an error.
    async fn fetch_filings(&self, date: NaiveDate) -> Result<Vec<FilingRecord>, FeedError>;
}

/// Client for the EDINET v2 document listing API.
pub struct EdinetClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EdinetClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/documents.json") {
            base.to_string()
        } else {
            format!("{}/documents.json", base)
        }
    }

    /// Full listing (`type=2`) needs a key; without one we get the
    /// metadata-only listing.
    fn listing_type(&self) -> u8 {
        if self.api_key.is_some() {
            2
        } else {
            1
        }
    }
}

#[async_trait]
impl FilingFeed for EdinetClient {
    async fn fetch_filings(&self, date: NaiveDate) -> Result<Vec<FilingRecord>, FeedError> {
        let date_param = date.format("%Y-%m-%d").to_string();
        let mut req = self.client.get(self.endpoint()).query(&[
            ("date", date_param.clone()),
            ("type", self.listing_type().to_string()),
        ]);
        if let Some(key) = &self.api_key {
            req = req.header(SUBSCRIPTION_KEY_HEADER, key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let filings = parse_documents(&body)?;
        info!(date = %date_param, count = filings.len(), "EDINET listing fetched");
        Ok(filings)
    }
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    metadata: Option<Metadata>,
    results: Option<Vec<EdinetDocument>>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdinetDocument {
    #[serde(rename = "docID")]
    doc_id: Option<String>,
    sec_code: Option<String>,
    filer_name: Option<String>,
    doc_type_code: Option<String>,
    doc_description: Option<String>,
    period_end: Option<String>,
    submit_date_time: Option<String>,
    withdrawal_status: Option<String>,
}

/// Decode a `documents.json` body into filing records, in listing order.
pub fn parse_documents(body: &str) -> Result<Vec<FilingRecord>, FeedError> {
    let resp: DocumentsResponse = serde_json::from_str(body)?;

    if let Some(meta) = &resp.metadata {
        if let Some(code) = meta.status.as_deref() {
            if code != "200" {
                return Err(FeedError::Api {
                    code: code.to_string(),
                    message: meta.message.clone().unwrap_or_default(),
                });
            }
        }
    }

    let docs = resp.results.unwrap_or_default();
    let total = docs.len();
    let filings: Vec<FilingRecord> = docs.into_iter().filter_map(into_record).collect();
    if filings.len() < total {
        debug!(skipped = total - filings.len(), "Dropped withdrawn or id-less documents");
    }
    Ok(filings)
}

fn into_record(doc: EdinetDocument) -> Option<FilingRecord> {
    let id = doc.doc_id.filter(|id| !id.trim().is_empty())?;
    if doc.withdrawal_status.as_deref().is_some_and(|s| s != "0") {
        return None;
    }

    let ticker = doc.sec_code.as_deref().and_then(listing_code);
    let submitted_at = doc
        .submit_date_time
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M").ok())
        .map(jst_to_utc);

    let document_type = doc
        .doc_type_code
        .as_deref()
        .map(DocumentType::from_edinet_code)
        .unwrap_or(DocumentType::Other);

    let mut record = FilingRecord::new(id, document_type, doc.doc_description.unwrap_or_default());
    if let Some(ticker) = ticker {
        record = record.with_ticker(ticker);
    }
    if let Some(filer) = doc.filer_name.filter(|n| !n.is_empty()) {
        record = record.with_filer(filer);
    }
    record.period_end = doc.period_end.filter(|p| !p.is_empty());
    record.submitted_at = submitted_at;
    record.url = Some(format!("{}{}", DOCUMENT_LINK_BASE, record.id));
    Some(record)
}

/// EDINET securities codes carry a trailing check digit `0`
/// ("72030" is listing code "7203").
fn listing_code(sec_code: &str) -> Option<String> {
    let code = sec_code.trim();
    if code.is_empty() {
        return None;
    }
    if code.len() == 5 && code.is_ascii() && code.ends_with('0') {
        Some(code[..4].to_string())
    } else {
        Some(code.to_string())
    }
}
