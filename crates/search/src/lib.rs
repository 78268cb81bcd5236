//! OpenSearch/Elasticsearch access for the reporting jobs: an HTTP backend,
//! typed responses, scroll and composite-aggregation paging, and a printer
//! for server error payloads.

mod client;
pub mod diagnostics;
mod error;
pub mod pager;
pub mod response;

pub use client::{Credentials, MockSearchBackend, OpenSearchClient, SearchBackend};
pub use error::{Result, SearchError};
