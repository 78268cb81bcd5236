use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};

/// Half-open `[start, end)` UTC range covered by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `lookback_days` whole days before midnight UTC of `date`.
    pub fn ending_on(date: NaiveDate, lookback_days: u32) -> Result<Self> {
        let end = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let start = end
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .ok_or_else(|| anyhow!("lookback of {lookback_days} days before {date} is out of range"))?;
        Ok(Self { start, end })
    }

    pub fn start_str(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_str(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Parse a `YYYY-MM-DD` report date.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{value}', expected YYYY-MM-DD"))
}
