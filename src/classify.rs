//! Filing → notification category.
//!
//! Rules are checked in order and the first match wins. Revision and
//! regulatory signals come before the generic document-type buckets because
//! they often arrive inside those same document types.

use std::fmt;

use crate::filings::{DocumentType, FilingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    Earnings,
    TimelyDisclosure,
    AnnualReport,
    Revision,
    DrugRegulatory,
    /// Not notifiable; dropped before dispatch.
    None,
}

impl NotificationCategory {
    pub fn is_notifiable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Earnings => "earnings",
            Self::TimelyDisclosure => "timely-disclosure",
            Self::AnnualReport => "annual-report",
            Self::Revision => "revision",
            Self::DrugRegulatory => "drug-regulatory",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// One classification rule. Matches when the document type is listed or
/// the title contains any keyword. Keywords are stored lowercase.
pub struct Rule {
    pub category: NotificationCategory,
    pub doc_types: &'static [DocumentType],
    pub keywords: &'static [&'static str],
}

impl Rule {
    pub fn matches(&self, doc_type: DocumentType, title_lower: &str) -> bool {
        self.doc_types.contains(&doc_type)
            || self.keywords.iter().any(|kw| title_lower.contains(kw))
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        category: NotificationCategory::Revision,
        doc_types: &[DocumentType::RevisionNotice],
        keywords: &[
            "上方修正",
            "下方修正",
            "業績修正",
            "業績予想の修正",
            "forecast revision",
            "upward revision",
            "downward revision",
            "revision of earnings",
        ],
    },
    Rule {
        category: NotificationCategory::DrugRegulatory,
        doc_types: &[DocumentType::RegulatoryNotice],
        keywords: &[
            "薬事",
            "fda",
            "治験",
            "新薬",
            "承認取得",
            "製造販売承認",
            "drug approval",
            "marketing approval",
        ],
    },
    Rule {
        category: NotificationCategory::AnnualReport,
        doc_types: &[DocumentType::AnnualReport],
        keywords: &[],
    },
    Rule {
        category: NotificationCategory::TimelyDisclosure,
        doc_types: &[DocumentType::ExtraordinaryReport],
        keywords: &[],
    },
    Rule {
        category: NotificationCategory::Earnings,
        doc_types: &[DocumentType::EarningsSummary],
        keywords: &["決算短信", "earnings summary", "earnings report"],
    },
];

/// Classify a filing. Pure and total: unmatched filings are `None`.
pub fn classify(record: &FilingRecord) -> NotificationCategory {
    let title = record.title.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(record.document_type, &title))
        .map(|rule| rule.category)
        .unwrap_or(NotificationCategory::None)
}
