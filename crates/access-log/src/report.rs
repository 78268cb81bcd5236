//! The three report pipelines.
//!
//! Each pipeline opens its output files, walks the search results page by
//! page and writes one line per record. A cancelled token stops the walk
//! between pages; partial files are kept and the summary is marked
//! incomplete. The request that opens a scroll is never abandoned midway,
//! so its context can always be released. Search failures are logged with their server payload and
//! returned.

use crate::{
    bucket::AggregateBucket,
    failure::TransferFailure,
    geo::{GeoDirectory, load_server_geo},
    output::{Layout, OutputSet},
    query::{
        COMPOSITE_AGGREGATION, ESTIMATE_AGGREGATION, bucket_estimate, composite_aggregation,
        filtered_search, scroll_search, transfer_failures,
    },
    record::{LogRecord, RawHit},
    settings::Settings,
    window::TimeWindow,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use ncar_search::{
    SearchBackend, SearchError,
    diagnostics::ErrorTree,
    pager::{CompositePager, ScrollPager, estimate_pages},
    response::Hit,
};
use tabled::{Table, Tabled, settings::Style};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct RunSummary {
    #[tabled(rename = "Report")]
    pub report: String,
    #[tabled(rename = "Pages")]
    pub pages: usize,
    #[tabled(rename = "Lines")]
    pub lines: usize,
    #[tabled(rename = "Completed")]
    pub completed: bool,
}

impl RunSummary {
    fn interrupted(report: &str) -> Self {
        Self {
            report: report.to_string(),
            pages: 0,
            lines: 0,
            completed: false,
        }
    }
}

pub fn print_summary(summary: &RunSummary) -> String {
    Table::new([summary])
        .with(Style::psql().remove_horizontals())
        .to_string()
}

/// Per-event report of the filtered access records.
pub async fn run_events<B, D>(
    backend: &B,
    directory: &D,
    settings: &Settings,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    B: SearchBackend + ?Sized,
    D: GeoDirectory + ?Sized,
{
    const REPORT: &str = "events";
    let events = &settings.events;
    let window = TimeWindow::ending_on(date, events.lookback_days)?;
    info!(start = %window.start_str(), end = %window.end_str(), "running {REPORT} report");

    let geo = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("shutdown signal received");
            return Ok(RunSummary::interrupted(REPORT));
        }
        geo = load_server_geo(directory, settings.geo.max_attempts, settings.geo.retry_delay()) => geo,
    };

    let body = if events.exclude_origin {
        scroll_search(
            &window,
            &settings.filename_filters,
            &settings.origin_site,
            events.page_size,
        )
    } else {
        filtered_search(&window, &settings.filename_filters, events.page_size)
    };

    let layout = Layout {
        dated: events.dated_file,
        split_by_server_type: events.split_by_server_type,
    };
    let output = OutputSet::open(&events.output_dir, date, layout)?;
    let pager = ScrollPager::new(
        backend,
        settings.search.index.as_str(),
        body,
        events.scroll.clone(),
    );

    run_scroll(REPORT, pager, output, cancel, |output, hit| {
        let Some(raw) = decode_hit::<RawHit>(hit) else {
            return;
        };
        let record = LogRecord::normalize(raw, &settings.origin_site, &geo);
        output.write_record(&record.to_string(), record.server_type);
    })
    .await
}

/// Five-minute buckets of origin traffic, paged by `after_key`.
pub async fn run_aggregate<B>(
    backend: &B,
    settings: &Settings,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    B: SearchBackend + ?Sized,
{
    const REPORT: &str = "aggregate";
    let aggregate = &settings.aggregate;
    let index = settings.search.index.as_str();
    let window = TimeWindow::ending_on(date, aggregate.lookback_days)?;
    info!(start = %window.start_str(), end = %window.end_str(), "running {REPORT} report");

    let estimate_body = bucket_estimate(&window, &settings.filename_filters, &settings.origin_site);
    let estimate = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("shutdown signal received");
            return Ok(RunSummary::interrupted(REPORT));
        }
        estimate = estimate_pages(backend, index, &estimate_body, ESTIMATE_AGGREGATION, aggregate.page_size) => estimate,
    };

    let layout = Layout {
        dated: aggregate.dated_file,
        split_by_server_type: false,
    };
    let mut output = OutputSet::open(&aggregate.output_dir, date, layout)?;
    let mut pager = CompositePager::new(backend, index, COMPOSITE_AGGREGATION, |after_key| {
        composite_aggregation(
            &window,
            &settings.filename_filters,
            &settings.origin_site,
            aggregate.page_size,
            after_key,
        )
    });

    let result: std::result::Result<bool, SearchError> = async {
        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("shutdown signal received, keeping partial output");
                    return Ok(false);
                }
                page = pager.next_page() => page?,
            };
            let Some(buckets) = page else {
                return Ok(true);
            };

            for bucket in &buckets {
                output.write_line(&AggregateBucket::from_composite(bucket).to_string());
            }
            info!(
                page = pager.pages(),
                estimated_pages = ?estimate,
                buckets = buckets.len(),
                "wrote composite page"
            );
        }
    }
    .await;

    let pages = pager.pages();
    let lines = output.finish();
    let completed = result.map_err(|err| search_failure(REPORT, err))?;
    Ok(summarize(REPORT, pages, lines, completed))
}

/// Failed OSPool transfers from the transfer-history cluster.
pub async fn run_failures<B>(
    backend: &B,
    settings: &Settings,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    B: SearchBackend + ?Sized,
{
    const REPORT: &str = "failures";
    let failures = &settings.failures;
    let window = TimeWindow::ending_on(date, failures.lookback_days)?;
    info!(start = %window.start_str(), end = %window.end_str(), "running {REPORT} report");

    let layout = Layout {
        dated: failures.dated_file,
        split_by_server_type: false,
    };
    let output = OutputSet::open(&failures.output_dir, date, layout)?;
    let pager = ScrollPager::new(
        backend,
        failures.search.index.as_str(),
        transfer_failures(&window, failures.page_size),
        failures.scroll.clone(),
    );

    run_scroll(REPORT, pager, output, cancel, |output, hit| {
        if let Some(failure) = decode_hit::<TransferFailure>(hit) {
            output.write_line(&failure.to_string());
        }
    })
    .await
}

/// Drain `pager` into `output`, then release the scroll and flush the files
/// whatever the outcome.
async fn run_scroll<B, F>(
    report: &str,
    mut pager: ScrollPager<'_, B>,
    mut output: OutputSet,
    cancel: &CancellationToken,
    mut write_hit: F,
) -> Result<RunSummary>
where
    B: SearchBackend + ?Sized,
    F: FnMut(&mut OutputSet, &Hit),
{
    let result: std::result::Result<bool, SearchError> = async {
        if cancel.is_cancelled() {
            warn!("shutdown signal received before the first page");
            return Ok(false);
        }

        // Dropping the opening request would lose its scroll id.
        let mut page = pager.next_page().await?;
        loop {
            let Some(hits) = page else {
                return Ok(true);
            };

            for hit in &hits {
                write_hit(&mut output, hit);
            }
            info!(
                page = pager.pages(),
                total_hits = ?pager.total_hits(),
                lines = output.lines(),
                "wrote scroll page"
            );

            page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("shutdown signal received, keeping partial output");
                    return Ok(false);
                }
                page = pager.next_page() => page?,
            };
        }
    }
    .await;

    pager.release().await;
    let pages = pager.pages();
    let lines = output.finish();
    let completed = result.map_err(|err| search_failure(report, err))?;
    Ok(summarize(report, pages, lines, completed))
}

fn decode_hit<T: serde::de::DeserializeOwned>(hit: &Hit) -> Option<T> {
    match hit.decode() {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(id = ?hit.id, error = %err, "skipping undecodable hit");
            None
        }
    }
}

fn summarize(report: &str, pages: usize, lines: usize, completed: bool) -> RunSummary {
    if completed {
        info!(report, pages, lines, "report complete");
    } else {
        warn!(report, pages, lines, "report interrupted");
    }
    RunSummary {
        report: report.to_string(),
        pages,
        lines,
        completed,
    }
}

/// Log the server payload of a failed search in expanded form.
fn search_failure(report: &str, err: SearchError) -> anyhow::Error {
    error!(report, error = %err, "search request failed");
    match err.info() {
        Some(info) => error!("error info:\n{}", ErrorTree(info)),
        None => error!("error info not available or not in expected format"),
    }
    anyhow::Error::new(err).context(format!("{report} report failed"))
}

/// Run the named report against the clusters and geo directory from
/// `settings`.
pub async fn run_report(
    report: ReportKind,
    settings: &Settings,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    match report {
        ReportKind::Events => {
            let backend = settings.search.client()?;
            let directory = crate::geo::HttpGeoDirectory::new(
                settings.geo.url.as_str(),
                settings.geo.timeout(),
            )
            .context("Failed to create geo directory client")?;
            run_events(&backend, &directory, settings, date, cancel).await
        }
        ReportKind::Aggregate => {
            let backend = settings.search.client()?;
            run_aggregate(&backend, settings, date, cancel).await
        }
        ReportKind::Failures => {
            let backend = settings.failures.search.client()?;
            run_failures(&backend, settings, date, cancel).await
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Events,
    Aggregate,
    Failures,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{MockGeoDirectory, ServerLocation};
    use ncar_search::{MockSearchBackend, response::SearchResponse};
    use serde_json::{Value, json};
    use std::{fs, path::Path};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.events.output_dir = dir.join("events");
        settings.events.dated_file = false;
        settings.aggregate.output_dir = dir.join("aggregate");
        settings.aggregate.dated_file = false;
        settings.failures.output_dir = dir.join("failures");
        settings
    }

    fn hits_page(scroll_id: &str, sources: Vec<Value>) -> SearchResponse {
        let hits = sources
            .into_iter()
            .map(|source| json!({ "_source": source }))
            .collect::<Vec<_>>();
        serde_json::from_value(json!({ "_scroll_id": scroll_id, "hits": { "hits": hits } }))
            .unwrap()
    }

    fn geo_directory() -> MockGeoDirectory {
        let mut directory = MockGeoDirectory::new();
        directory.expect_fetch_servers().returning(|| {
            Ok(vec![ServerLocation {
                name: "SDSC_CACHE".to_string(),
                latitude: Some(32.88),
                longitude: Some(-117.24),
            }])
        });
        directory
    }

    #[tokio::test]
    async fn test_events_report() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let mut backend = MockSearchBackend::new();
        backend
            .expect_open_scroll()
            .withf(|_, body, _| body["query"]["bool"]["must_not"].is_array())
            .times(1)
            .returning(|_, _, _| {
                Ok(hits_page(
                    "s1",
                    vec![
                        json!({ "@timestamp": "t1", "filename": "/ncar/a", "site": "SDSC_CACHE", "read": 10 }),
                        Value::Null,
                    ],
                ))
            });
        backend
            .expect_scroll()
            .times(1)
            .returning(|_, _| Ok(hits_page("s1", vec![])));
        backend
            .expect_clear_scroll()
            .times(1)
            .returning(|_| Ok(()));

        let summary = run_events(
            &backend,
            &geo_directory(),
            &settings,
            date(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(summary.completed);
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.lines, 1);

        let latest = fs::read_to_string(settings.events.output_dir.join("latest.log")).unwrap();
        assert!(latest.starts_with("[t1] [Objectname:/ncar/a] [Site:SDSC_CACHE]"));
        assert!(latest.contains("[ServerType:cache] [Latitude:32.88] [Longitude:-117.24]"));
        assert!(latest.ends_with("[Read:10] [Write:N/A] [OpTime:-1s]\n"));
    }

    #[tokio::test]
    async fn test_interrupted_run_releases_scroll() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let cancel = CancellationToken::new();

        let mut backend = MockSearchBackend::new();
        let token = cancel.clone();
        backend
            .expect_open_scroll()
            .times(1)
            .returning(move |_, _, _| {
                token.cancel();
                Ok(hits_page("s1", vec![json!({ "Endpoint": "cache:8443" })]))
            });
        backend.expect_scroll().never();
        backend
            .expect_clear_scroll()
            .withf(|id| id == "s1")
            .times(1)
            .returning(|_| Ok(()));

        let summary = run_failures(&backend, &settings, date(), &cancel)
            .await
            .unwrap();

        assert!(!summary.completed);
        assert_eq!(summary.lines, 1);
        let latest = fs::read_to_string(settings.failures.output_dir.join("latest.log")).unwrap();
        assert_eq!(latest, "cache:8443 [None] [None] None\n");
    }

    #[tokio::test]
    async fn test_search_error_still_releases_scroll() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let mut backend = MockSearchBackend::new();
        backend
            .expect_open_scroll()
            .times(1)
            .returning(|_, _, _| Ok(hits_page("s1", vec![json!({ "Endpoint": "a" })])));
        backend.expect_scroll().times(1).returning(|_, _| {
            Err(SearchError::Server {
                status: 404,
                info: json!({ "error": { "root_cause": [{ "type": "search_context_missing_exception" }] } }),
            })
        });
        backend
            .expect_clear_scroll()
            .times(1)
            .returning(|_| Ok(()));

        let err = run_failures(&backend, &settings, date(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failures report failed"));

        // Lines written before the failure are flushed.
        let latest = fs::read_to_string(settings.failures.output_dir.join("latest.log")).unwrap();
        assert_eq!(latest, "a [None] [None] None\n");
    }

    #[tokio::test]
    async fn test_empty_result_set_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.failures.scroll = None;

        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .times(1)
            .returning(|_, _| Ok(serde_json::from_value(json!({ "hits": { "hits": [] } })).unwrap()));
        backend.expect_clear_scroll().never();

        let summary = run_failures(&backend, &settings, date(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.completed);
        assert_eq!(summary.pages, 0);
        let latest = fs::read_to_string(settings.failures.output_dir.join("latest.log")).unwrap();
        assert!(latest.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_report() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let mut backend = MockSearchBackend::new();
        backend
            .expect_search()
            .withf(|_, body| body["aggs"].get(ESTIMATE_AGGREGATION).is_some())
            .times(1)
            .returning(|_, _| {
                Ok(serde_json::from_value(
                    json!({ "aggregations": { "total_buckets": { "value": 1.0 } } }),
                )
                .unwrap())
            });
        backend
            .expect_search()
            .withf(|_, body| body["aggs"].get(COMPOSITE_AGGREGATION).is_some())
            .times(1)
            .returning(|_, _| {
                Ok(serde_json::from_value(json!({
                    "aggregations": {
                        "buckets": {
                            "buckets": [{
                                "key": { "interval": 1704067200000u64, "filename": "/ncar/a" },
                                "doc_count": 2,
                                "read": { "value": 20.0 },
                                "write": { "value": 0.0 },
                                "operation_time": { "value": 3.0 }
                            }]
                        }
                    }
                }))
                .unwrap())
            });

        let summary = run_aggregate(&backend, &settings, date(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.completed);
        assert_eq!((summary.pages, summary.lines), (1, 1));
        let latest = fs::read_to_string(settings.aggregate.output_dir.join("latest.log")).unwrap();
        assert_eq!(
            latest,
            "[2024-01-01T00:00:00Z] [Objectname:/ncar/a] [ServerType:origin] \
             [Read:20] [Write:0] [OpTime:3s] [Count:2]\n"
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut backend = MockSearchBackend::new();
        backend.expect_search().never();

        let summary = run_aggregate(&backend, &settings, date(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary, RunSummary::interrupted("aggregate"));
        assert!(!settings.aggregate.output_dir.exists());
    }

    /// Cancels the token and yields while the scroll is being opened.
    struct SlowOpen {
        cancel: CancellationToken,
        cleared: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SearchBackend for SlowOpen {
        async fn search(&self, _index: &str, _body: &Value) -> ncar_search::Result<SearchResponse> {
            unreachable!("scrolling is enabled")
        }

        async fn open_scroll(
            &self,
            _index: &str,
            _body: &Value,
            _keep_alive: &str,
        ) -> ncar_search::Result<SearchResponse> {
            self.cancel.cancel();
            tokio::task::yield_now().await;
            Ok(hits_page("opened", vec![json!({ "Endpoint": "cache:8443" })]))
        }

        async fn scroll(
            &self,
            _scroll_id: &str,
            _keep_alive: &str,
        ) -> ncar_search::Result<SearchResponse> {
            unreachable!("cancelled after the first page")
        }

        async fn clear_scroll(&self, scroll_id: &str) -> ncar_search::Result<()> {
            self.cleared.lock().unwrap().push(scroll_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_during_open_still_releases_scroll() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let cancel = CancellationToken::new();
        let backend = SlowOpen {
            cancel: cancel.clone(),
            cleared: Default::default(),
        };

        let summary = run_failures(&backend, &settings, date(), &cancel)
            .await
            .unwrap();

        assert!(!summary.completed);
        assert_eq!((summary.pages, summary.lines), (1, 1));
        assert_eq!(*backend.cleared.lock().unwrap(), ["opened"]);
    }

    #[tokio::test]
    async fn test_cancelled_scroll_report_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut backend = MockSearchBackend::new();
        backend.expect_open_scroll().never();
        backend.expect_clear_scroll().never();

        let summary = run_failures(&backend, &settings, date(), &cancel)
            .await
            .unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.lines, 0);
    }

    #[test]
    fn test_print_summary() {
        let table = print_summary(&RunSummary {
            report: "events".to_string(),
            pages: 3,
            lines: 25_000,
            completed: true,
        });
        assert!(table.contains("Report"));
        assert!(table.contains("25000"));
        assert!(table.contains("true"));
    }
}
