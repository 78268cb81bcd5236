//! Sequential paging over search results.
//!
//! [`ScrollPager`] walks a scroll cursor (or issues a single plain search when
//! no keep-alive is configured) and [`CompositePager`] walks the `after_key`
//! of a composite aggregation. Both yield each server page exactly once and
//! stop as soon as the server signals exhaustion.

use crate::{
    client::SearchBackend,
    error::{Result, SearchError},
    response::{CompositeBucket, Hit},
};
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollState {
    Fresh,
    Open,
    Exhausted,
}

pub struct ScrollPager<'a, B: SearchBackend + ?Sized> {
    backend: &'a B,
    index: String,
    body: Value,
    keep_alive: Option<String>,
    scroll_id: Option<String>,
    state: ScrollState,
    pages: usize,
    total_hits: Option<u64>,
}

impl<'a, B: SearchBackend + ?Sized> ScrollPager<'a, B> {
    /// With `keep_alive` set the pager scrolls; without it, the first page is
    /// the only page.
    pub fn new(
        backend: &'a B,
        index: impl Into<String>,
        body: Value,
        keep_alive: Option<String>,
    ) -> Self {
        Self {
            backend,
            index: index.into(),
            body,
            keep_alive,
            scroll_id: None,
            state: ScrollState::Fresh,
            pages: 0,
            total_hits: None,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Total hit count reported with the first page.
    pub fn total_hits(&self) -> Option<u64> {
        self.total_hits
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<Hit>>> {
        let response = match (self.state, self.keep_alive.as_deref()) {
            (ScrollState::Exhausted, _) => return Ok(None),
            (ScrollState::Fresh, None) => {
                self.state = ScrollState::Exhausted;
                self.backend.search(&self.index, &self.body).await?
            }
            (ScrollState::Fresh, Some(keep_alive)) => {
                let response = self
                    .backend
                    .open_scroll(&self.index, &self.body, keep_alive)
                    .await?;
                self.state = ScrollState::Open;
                response
            }
            (ScrollState::Open, Some(keep_alive)) => {
                let Some(scroll_id) = self.scroll_id.as_deref() else {
                    self.state = ScrollState::Exhausted;
                    return Ok(None);
                };
                self.backend.scroll(scroll_id, keep_alive).await?
            }
            (ScrollState::Open, None) => {
                self.state = ScrollState::Exhausted;
                return Ok(None);
            }
        };

        if self.pages == 0 {
            self.total_hits = response.total_hits();
        }
        if let Some(scroll_id) = response.scroll_id {
            self.scroll_id = Some(scroll_id);
        }

        if response.hits.hits.is_empty() {
            self.state = ScrollState::Exhausted;
            return Ok(None);
        }

        if self.state == ScrollState::Open && self.scroll_id.is_none() {
            warn!(index = %self.index, "scroll response carried no scroll id, stopping after this page");
            self.state = ScrollState::Exhausted;
        }

        self.pages += 1;
        debug!(
            page = self.pages,
            hits = response.hits.hits.len(),
            "fetched scroll page"
        );
        Ok(Some(response.hits.hits))
    }

    /// Clear the server-side scroll context. Safe to call more than once and
    /// after an error or interruption; failures are logged only.
    pub async fn release(&mut self) {
        self.state = ScrollState::Exhausted;
        if let Some(scroll_id) = self.scroll_id.take() {
            match self.backend.clear_scroll(&scroll_id).await {
                Ok(()) => debug!("released scroll context"),
                Err(err) => warn!(error = %err, "failed to release scroll context"),
            }
        }
    }
}

pub struct CompositePager<'a, B: SearchBackend + ?Sized, F> {
    backend: &'a B,
    index: String,
    aggregation: String,
    build_request: F,
    after_key: Option<Value>,
    done: bool,
    pages: usize,
}

impl<'a, B, F> CompositePager<'a, B, F>
where
    B: SearchBackend + ?Sized,
    F: Fn(Option<&Value>) -> Value,
{
    /// `build_request` renders the request body for a given `after_key`;
    /// `aggregation` names the composite aggregation in the response.
    pub fn new(
        backend: &'a B,
        index: impl Into<String>,
        aggregation: impl Into<String>,
        build_request: F,
    ) -> Self {
        Self {
            backend,
            index: index.into(),
            aggregation: aggregation.into(),
            build_request,
            after_key: None,
            done: false,
            pages: 0,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<CompositeBucket>>> {
        if self.done {
            return Ok(None);
        }

        let body = (self.build_request)(self.after_key.as_ref());
        let response = self.backend.search(&self.index, &body).await?;
        let composite = response.composite(&self.aggregation)?;

        match composite.after_key {
            None => self.done = true,
            Some(next) if self.after_key.as_ref() == Some(&next) => {
                self.done = true;
                return Err(SearchError::RepeatedAfterKey(next));
            }
            Some(next) => self.after_key = Some(next),
        }

        if composite.buckets.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.pages += 1;
        debug!(
            page = self.pages,
            buckets = composite.buckets.len(),
            "fetched composite page"
        );
        Ok(Some(composite.buckets))
    }
}

/// Advisory page count from a single metric aggregation holding the expected
/// number of buckets. Never fails: errors are logged and yield `None`.
pub async fn estimate_pages<B: SearchBackend + ?Sized>(
    backend: &B,
    index: &str,
    body: &Value,
    metric: &str,
    page_size: usize,
) -> Option<u64> {
    match backend.search(index, body).await {
        Ok(response) => {
            let buckets = response.metric_value(metric)?;
            let pages = (buckets / page_size.max(1) as f64).ceil() as u64;
            info!(buckets, pages, "estimated composite pages");
            Some(pages)
        }
        Err(err) => {
            warn!(error = %err, "page estimate failed, continuing without it");
            None
        }
    }
}
