//! Financial facts for earnings filings.
//!
//! Extraction never fails. Anything that goes wrong (no payload reference,
//! source error, timeout, unparsable number) shows up as
//! [`Figure::Unavailable`] for the affected facts and the filing is still
//! notified.

pub mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::filings::{FilingRecord, PayloadRef};

const REVENUE_LABELS: &[&str] = &["totalRevenue", "NetSales", "Revenue", "Revenues", "売上高", "営業収益"];
const NET_INCOME_LABELS: &[&str] = &[
    "netIncome",
    "ProfitLossAttributableToOwnersOfParent",
    "NetIncome",
    "親会社株主に帰属する当期純利益",
    "当期純利益",
];
const DEBT_LABELS: &[&str] = &["interestBearingDebt", "InterestBearingDebt", "totalDebt", "有利子負債"];

/// (suffix, multiplier); longer suffixes first so 百万円 wins over 円.
const UNIT_SUFFIXES: &[(&str, f64)] = &[
    ("百万円", 1e6),
    ("千円", 1e3),
    ("億円", 1e8),
    ("兆円", 1e12),
    ("円", 1.0),
];

/// A single financial figure, or an explicit marker that it could not be had.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Figure {
    Amount(f64),
    Unavailable,
}

impl Figure {
    pub fn amount(&self) -> Option<f64> {
        match self {
            Self::Amount(v) => Some(*v),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Amount(_))
    }

    fn from_raw(raw: Option<&str>) -> Self {
        raw.and_then(parse_amount)
            .map(Self::Amount)
            .unwrap_or(Self::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialFacts {
    pub revenue: Figure,
    pub net_income: Figure,
    pub interest_bearing_debt: Figure,
    pub fiscal_period: Option<String>,
    pub sector: Option<String>,
    /// Display name from the supplementary source, if it has one.
    pub company: Option<String>,
}

impl FinancialFacts {
    pub fn unavailable() -> Self {
        Self {
            revenue: Figure::Unavailable,
            net_income: Figure::Unavailable,
            interest_bearing_debt: Figure::Unavailable,
            fiscal_period: None,
            sector: None,
            company: None,
        }
    }

    pub fn from_supplement(supplement: &Supplement) -> Self {
        Self {
            revenue: Figure::from_raw(supplement.lookup(REVENUE_LABELS)),
            net_income: Figure::from_raw(supplement.lookup(NET_INCOME_LABELS)),
            interest_bearing_debt: Figure::from_raw(supplement.lookup(DEBT_LABELS)),
            fiscal_period: supplement.fiscal_period.clone(),
            sector: supplement.sector.clone(),
            company: supplement.company.clone(),
        }
    }

    /// Number of the three figures that could not be extracted.
    pub fn missing(&self) -> usize {
        [self.revenue, self.net_income, self.interest_bearing_debt]
            .iter()
            .filter(|f| !f.is_available())
            .count()
    }
}

/// Raw supplementary data for a filing: labelled values as the source
/// reported them, plus descriptive fields.
#[derive(Debug, Clone, Default)]
pub struct Supplement {
    pub company: Option<String>,
    pub sector: Option<String>,
    pub fiscal_period: Option<String>,
    pub items: Vec<(String, String)>,
}

impl Supplement {
    /// Value of the first alias present. Aliases are tried in order and
    /// compared case-insensitively.
    pub fn lookup(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            self.items
                .iter()
                .find(|(label, _)| label.eq_ignore_ascii_case(alias))
                .map(|(_, value)| value.as_str())
        })
    }
}

/// Where supplementary financial data comes from.
#[async_trait]
pub trait SupplementarySource: Send + Sync {
    async fn fetch(&self, reference: &PayloadRef) -> anyhow::Result<Supplement>;
}

pub struct FactExtractor {
    source: Arc<dyn SupplementarySource>,
    timeout: Duration,
}

impl FactExtractor {
    pub fn new(source: Arc<dyn SupplementarySource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn extract(&self, record: &FilingRecord) -> FinancialFacts {
        let Some(reference) = &record.payload_ref else {
            debug!(filing_id = %record.id, "No payload reference, facts unavailable");
            return FinancialFacts::unavailable();
        };

        let supplement = match tokio::time::timeout(self.timeout, self.source.fetch(reference)).await {
            Ok(Ok(supplement)) => supplement,
            Ok(Err(e)) => {
                warn!(filing_id = %record.id, reference = reference.as_str(), "Supplementary data unavailable: {:#}", e);
                return FinancialFacts::unavailable();
            }
            Err(_) => {
                warn!(filing_id = %record.id, reference = reference.as_str(), timeout = ?self.timeout, "Supplementary data timed out");
                return FinancialFacts::unavailable();
            }
        };

        let facts = FinancialFacts::from_supplement(&supplement);
        if facts.missing() > 0 {
            debug!(filing_id = %record.id, missing = facts.missing(), "Partial financial facts");
        }
        facts
    }
}

/// Parse a monetary amount as written in filings and data feeds.
///
/// Handles full-width digits, `,` `.` `'` and space grouping, decimal
/// comma, negatives as `-`, `−`, `△`, `▲` or `(…)`, and yen unit suffixes.
/// Returns `None` for anything that is not a number.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let normalized: String = raw.trim().chars().map(normalize_char).collect();
    let mut text = normalized.trim();

    let mut multiplier = 1.0;
    for (suffix, factor) in UNIT_SUFFIXES {
        if let Some(rest) = text.strip_suffix(suffix) {
            text = rest.trim_end();
            multiplier = *factor;
            break;
        }
    }

    let mut negative = false;
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        negative = true;
        text = inner.trim();
    }
    if let Some(rest) = text.strip_prefix(['-', '△', '▲']) {
        negative = !negative;
        text = rest.trim_start();
    }

    let digits = normalize_separators(text)?;
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let value = value * multiplier;
    Some(if negative { -value } else { value })
}

fn normalize_char(c: char) -> char {
    match c {
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
        '，' => ',',
        '．' => '.',
        '（' => '(',
        '）' => ')',
        '－' | '−' | '‐' | '—' => '-',
        '\u{a0}' | '\u{3000}' => ' ',
        other => other,
    }
}

/// Reduce grouping and decimal separators to a plain `123.45` string.
/// Grouped digits must be in groups of three (or Indian-style twos ending
/// in a group of three); anything else is rejected rather than guessed.
fn normalize_separators(text: &str) -> Option<String> {
    let is_separator = |c: char| matches!(c, ',' | '.' | ' ' | '\'');
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || is_separator(c)) {
        return None;
    }

    let commas = text.matches(',').count();
    let dots = text.matches('.').count();
    let decimal = match (commas, dots) {
        (0, 0) => None,
        (_, 0) => {
            // a lone comma not followed by exactly three digits is a decimal comma
            let tail = text.rsplit(',').next().unwrap_or("");
            (commas == 1 && tail.len() != 3).then_some(',')
        }
        (0, _) => (dots == 1).then_some('.'),
        _ => {
            let last_comma = text.rfind(',').unwrap_or(0);
            let last_dot = text.rfind('.').unwrap_or(0);
            Some(if last_comma > last_dot { ',' } else { '.' })
        }
    };

    let (integer, fraction) = match decimal {
        Some(sep) => {
            let (integer, fraction) = text.rsplit_once(sep)?;
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            (integer, Some(fraction))
        }
        None => (text, None),
    };

    let groups: Vec<&str> = integer.split(is_separator).collect();
    if !valid_grouping(&groups) {
        return None;
    }

    let mut out = groups.concat();
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    Some(out)
}

fn valid_grouping(groups: &[&str]) -> bool {
    let Some((first, rest)) = groups.split_first() else {
        return false;
    };
    if first.is_empty() {
        return false;
    }
    let Some((last, middle)) = rest.split_last() else {
        return true;
    };
    if first.len() > 3 || last.len() != 3 {
        return false;
    }
    middle.iter().all(|g| g.len() == 3) || middle.iter().all(|g| g.len() == 2)
}
