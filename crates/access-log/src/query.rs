//! Request bodies for the report queries.
//!
//! Every builder is a pure function of its inputs; the pagers decide how the
//! bodies are sent.

use crate::window::TimeWindow;
use serde_json::{Value, json};

/// `_source` fields decoded into [`crate::record::RawHit`].
pub const EVENT_FIELDS: [&str; 9] = [
    "@timestamp",
    "filename",
    "site",
    "host",
    "server",
    "read",
    "write",
    "operation_time",
    "appinfo",
];

pub const FAILURE_FIELDS: [&str; 4] = [
    "Endpoint",
    "TransferType",
    "TransferProtocol",
    "TransferError",
];

/// Name of the composite aggregation in [`composite_aggregation`].
pub const COMPOSITE_AGGREGATION: &str = "buckets";

/// Name of the bucket-count pipeline aggregation in [`bucket_estimate`].
pub const ESTIMATE_AGGREGATION: &str = "total_buckets";

pub const BUCKET_INTERVAL: &str = "5m";

fn timestamp_range(field: &str, window: &TimeWindow) -> Value {
    json!({
        "range": {
            field: {
                "gte": window.start_str(),
                "lt": window.end_str()
            }
        }
    })
}

fn filename_filter(filters: &[String]) -> Value {
    let should = filters
        .iter()
        .map(|filter| json!({ "wildcard": { "filename": { "value": format!("*{filter}*") } } }))
        .collect::<Vec<_>>();

    json!({
        "bool": {
            "should": should,
            "minimum_should_match": 1
        }
    })
}

fn site_term(origin_site: &str) -> Value {
    json!({ "term": { "site": origin_site } })
}

/// Events in the window whose filename matches any filter.
pub fn filtered_search(window: &TimeWindow, filters: &[String], size: usize) -> Value {
    json!({
        "size": size,
        "_source": EVENT_FIELDS,
        "query": {
            "bool": {
                "filter": [
                    timestamp_range("@timestamp", window),
                    filename_filter(filters)
                ]
            }
        }
    })
}

/// [`filtered_search`] without origin-site events, for scrolling cache traffic.
pub fn scroll_search(
    window: &TimeWindow,
    filters: &[String],
    origin_site: &str,
    size: usize,
) -> Value {
    let mut body = filtered_search(window, filters, size);
    body["query"]["bool"]["must_not"] = json!([site_term(origin_site)]);
    body
}

fn origin_query(window: &TimeWindow, filters: &[String], origin_site: &str) -> Value {
    json!({
        "bool": {
            "filter": [
                timestamp_range("@timestamp", window),
                filename_filter(filters),
                site_term(origin_site)
            ]
        }
    })
}

/// Origin traffic grouped by five-minute interval and filename, resuming
/// after `after_key` when given.
pub fn composite_aggregation(
    window: &TimeWindow,
    filters: &[String],
    origin_site: &str,
    page_size: usize,
    after_key: Option<&Value>,
) -> Value {
    let mut composite = json!({
        "size": page_size,
        "sources": [
            { "interval": { "date_histogram": { "field": "@timestamp", "fixed_interval": BUCKET_INTERVAL } } },
            { "filename": { "terms": { "field": "filename" } } }
        ]
    });
    if let Some(after_key) = after_key {
        composite["after"] = after_key.clone();
    }

    json!({
        "size": 0,
        "query": origin_query(window, filters, origin_site),
        "aggs": {
            COMPOSITE_AGGREGATION: {
                "composite": composite,
                "aggs": {
                    "read": { "sum": { "field": "read" } },
                    "write": { "sum": { "field": "write" } },
                    "operation_time": { "sum": { "field": "operation_time" } }
                }
            }
        }
    })
}

/// Expected number of composite buckets: distinct filenames per interval,
/// summed over the window.
pub fn bucket_estimate(window: &TimeWindow, filters: &[String], origin_site: &str) -> Value {
    json!({
        "size": 0,
        "query": origin_query(window, filters, origin_site),
        "aggs": {
            "per_interval": {
                "date_histogram": { "field": "@timestamp", "fixed_interval": BUCKET_INTERVAL },
                "aggs": {
                    "files": { "cardinality": { "field": "filename" } }
                }
            },
            ESTIMATE_AGGREGATION: {
                "sum_bucket": { "buckets_path": "per_interval>files" }
            }
        }
    })
}

/// Failed OSPool transfers that started inside the window.
pub fn transfer_failures(window: &TimeWindow, size: usize) -> Value {
    json!({
        "size": size,
        "_source": FAILURE_FIELDS,
        "query": {
            "bool": {
                "filter": [
                    timestamp_range("TransferStartTime", window),
                    { "term": { "TransferSuccess": false } }
                ]
            }
        }
    })
}
