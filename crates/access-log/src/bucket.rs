use crate::record::{NOT_AVAILABLE, ServerType};
use chrono::{DateTime, SecondsFormat};
use ncar_search::response::CompositeBucket;
use serde_json::Value;
use std::fmt;

/// Origin traffic for one five-minute interval and filename.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBucket {
    pub interval_start: String,
    pub filename: String,
    pub read: f64,
    pub write: f64,
    pub operation_time: f64,
    pub count: u64,
}

impl AggregateBucket {
    /// Missing sums count as zero, missing keys as [`NOT_AVAILABLE`].
    pub fn from_composite(bucket: &CompositeBucket) -> Self {
        Self {
            interval_start: interval_key(bucket.key.get("interval")),
            filename: match bucket.key.get("filename") {
                Some(Value::String(name)) => name.clone(),
                Some(Value::Null) | None => NOT_AVAILABLE.to_string(),
                Some(other) => other.to_string(),
            },
            read: bucket.metric("read").unwrap_or_default(),
            write: bucket.metric("write").unwrap_or_default(),
            operation_time: bucket.metric("operation_time").unwrap_or_default(),
            count: bucket.doc_count,
        }
    }
}

/// `date_histogram` keys arrive as epoch milliseconds.
fn interval_key(key: Option<&Value>) -> String {
    match key {
        Some(Value::Number(millis)) => millis
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| millis.to_string()),
        Some(Value::String(text)) => text.clone(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

impl fmt::Display for AggregateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [Objectname:{}] [ServerType:{}] [Read:{}] [Write:{}] [OpTime:{}s] [Count:{}]",
            self.interval_start,
            self.filename,
            ServerType::Origin,
            self.read,
            self.write,
            self.operation_time,
            self.count,
        )
    }
}
