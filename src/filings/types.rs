use chrono::{DateTime, Utc};

/// Feed-assigned submission ID (EDINET `docID`). Stable across re-fetches.
pub type FilingId = String;

/// Document types the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    EarningsSummary,
    ExtraordinaryReport,
    AnnualReport,
    RevisionNotice,
    RegulatoryNotice,
    Other,
}

impl DocumentType {
    /// Map an EDINET `docTypeCode`.
    pub fn from_edinet_code(code: &str) -> Self {
        match code.trim() {
            "120" => Self::AnnualReport,
            "180" => Self::ExtraordinaryReport,
            _ => Self::Other,
        }
    }

    /// Short tag used in logs.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::EarningsSummary => "earnings-summary",
            Self::ExtraordinaryReport => "extraordinary-report",
            Self::AnnualReport => "annual-report",
            Self::RevisionNotice => "revision-notice",
            Self::RegulatoryNotice => "regulatory-notice",
            Self::Other => "other",
        }
    }
}

/// Handle the fact extractor uses to look up supplementary data.
/// For EDINET filings this is the 4-digit listing code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRef(pub String);

impl PayloadRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One disclosure submission as returned by the feed.
#[derive(Debug, Clone)]
pub struct FilingRecord {
    pub id: FilingId,
    /// Absent for funds and other non-listed filers.
    pub ticker: Option<String>,
    pub document_type: DocumentType,
    pub title: String,
    pub filer_name: Option<String>,
    /// e.g. "2025-03-31"
    pub period_end: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub payload_ref: Option<PayloadRef>,
    /// Human-facing link to the filing.
    pub url: Option<String>,
}

impl FilingRecord {
    /// Minimal record; remaining fields default to absent.
    pub fn new(id: impl Into<String>, document_type: DocumentType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ticker: None,
            document_type,
            title: title.into(),
            filer_name: None,
            period_end: None,
            submitted_at: None,
            payload_ref: None,
            url: None,
        }
    }

    /// Set the ticker and use it as the supplementary data handle.
    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        let ticker = ticker.into();
        self.payload_ref = Some(PayloadRef(ticker.clone()));
        self.ticker = Some(ticker);
        self
    }

    pub fn with_filer(mut self, filer_name: impl Into<String>) -> Self {
        self.filer_name = Some(filer_name.into());
        self
    }
}
