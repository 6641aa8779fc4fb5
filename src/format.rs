//! Filing → channel notification.
//!
//! Every category has a fixed embed template. Rendering never fails;
//! missing data falls back to placeholder text.

use chrono::{DateTime, Utc};

use crate::classify::NotificationCategory;
use crate::dispatch::Channel;
use crate::facts::{Figure, FinancialFacts};
use crate::filings::FilingRecord;

const SOURCE_LABEL: &str = "EDINET";
const UNKNOWN: &str = "不明";
const NOT_AVAILABLE: &str = "N/A";

const EARNINGS_USERNAME: &str = "決算Bot";
const NEWS_USERNAME: &str = "ニュースBot";

const EARNINGS_DESCRIPTION_CHARS: usize = 150;
const NEWS_DESCRIPTION_CHARS: usize = 200;

const COLOR_EARNINGS: u32 = 0x00b4d8;
const COLOR_REVISION_DOWN: u32 = 0xe63946;
const COLOR_REVISION_UP: u32 = 0x2dc653;
const COLOR_DRUG: u32 = 0x9b5de5;
const COLOR_ANNUAL: u32 = 0x4361ee;
const COLOR_DISCLOSURE: u32 = 0xadb5bd;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A rendered notification, ready for one delivery.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub channel: Channel,
    pub category: NotificationCategory,
    pub filing_id: String,
    pub username: String,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: String,
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn format_notification(
    record: &FilingRecord,
    category: NotificationCategory,
    facts: Option<&FinancialFacts>,
) -> NotificationPayload {
    match category {
        NotificationCategory::Earnings => earnings_payload(record, facts),
        other => news_payload(record, other),
    }
}

fn earnings_payload(record: &FilingRecord, facts: Option<&FinancialFacts>) -> NotificationPayload {
    let unavailable = FinancialFacts::unavailable();
    let facts = facts.unwrap_or(&unavailable);

    let company = facts
        .company
        .as_deref()
        .or(record.filer_name.as_deref())
        .unwrap_or(UNKNOWN);
    let title = format!("📊 {}{} 決算発表", company, ticker_suffix(record));

    let period = record
        .period_end
        .as_deref()
        .or(facts.fiscal_period.as_deref())
        .unwrap_or(UNKNOWN);
    let sector = facts.sector.as_deref().unwrap_or(UNKNOWN);

    NotificationPayload {
        channel: Channel::for_category(NotificationCategory::Earnings),
        category: NotificationCategory::Earnings,
        filing_id: record.id.clone(),
        username: EARNINGS_USERNAME.to_string(),
        title,
        description: truncate_chars(&record.title, EARNINGS_DESCRIPTION_CHARS),
        url: record.url.clone(),
        color: COLOR_EARNINGS,
        fields: vec![
            field("💹 売上高", format_yen(facts.revenue)),
            field("📈 純利益", format_yen(facts.net_income)),
            field("🏦 有利子負債", format_yen(facts.interest_bearing_debt)),
        ],
        footer: format!("セクター: {}　|　決算期: {}　|　{}", sector, period, SOURCE_LABEL),
        timestamp: record.submitted_at,
    }
}

fn news_payload(record: &FilingRecord, category: NotificationCategory) -> NotificationPayload {
    let (label, color) = match category {
        NotificationCategory::Revision => {
            let title = record.title.to_lowercase();
            let color = if title.contains("下方") || title.contains("downward") {
                COLOR_REVISION_DOWN
            } else {
                COLOR_REVISION_UP
            };
            ("🔄 業績修正", color)
        }
        NotificationCategory::DrugRegulatory => ("💊 新薬・薬事承認", COLOR_DRUG),
        NotificationCategory::AnnualReport => ("📘 有価証券報告書", COLOR_ANNUAL),
        _ => ("📌 適時開示", COLOR_DISCLOSURE),
    };

    let company = record.filer_name.as_deref().unwrap_or(UNKNOWN);
    let description = if record.title.trim().is_empty() {
        "詳細はリンク先を確認".to_string()
    } else {
        truncate_chars(&record.title, NEWS_DESCRIPTION_CHARS)
    };

    NotificationPayload {
        channel: Channel::for_category(category),
        category,
        filing_id: record.id.clone(),
        username: NEWS_USERNAME.to_string(),
        title: format!("{}｜{}{}", label, company, ticker_suffix(record)),
        description,
        url: record.url.clone(),
        color,
        fields: Vec::new(),
        footer: SOURCE_LABEL.to_string(),
        timestamp: record.submitted_at,
    }
}

fn ticker_suffix(record: &FilingRecord) -> String {
    match record.ticker.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => format!("（{}）", t),
        _ => String::new(),
    }
}

fn field(name: &str, value: String) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline: true,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Render a yen amount: 兆円 / 億円 for large values, grouped digits below.
pub fn format_yen(figure: Figure) -> String {
    let Some(value) = figure.amount() else {
        return NOT_AVAILABLE.to_string();
    };
    let abs = value.abs();
    if abs >= 1e12 {
        format!("{:.2}兆円", value / 1e12)
    } else if abs >= 1e8 {
        format!("{:.1}億円", value / 1e8)
    } else {
        format!("{}円", group_digits(value.round() as i64))
    }
}

fn group_digits(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
