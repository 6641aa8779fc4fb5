pub mod types;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};

pub use types::{DocumentType, FilingId, FilingRecord, PayloadRef};

/// The feed dates filings in Japan time, which has no DST.
const JST_OFFSET_HOURS: i64 = 9;

/// Interpret a wall-clock JST timestamp as UTC.
pub fn jst_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    (local - Duration::hours(JST_OFFSET_HOURS)).and_utc()
}

/// Business date for a run started at `now`: today in JST, with
/// Saturday and Sunday rolled back to the preceding Friday.
pub fn business_date(now: DateTime<Utc>) -> NaiveDate {
    let today = (now + Duration::hours(JST_OFFSET_HOURS)).date_naive();
    match today.weekday() {
        Weekday::Sat => today - Duration::days(1),
        Weekday::Sun => today - Duration::days(2),
        _ => today,
    }
}
