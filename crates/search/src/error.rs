use serde_json::Value;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("search transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search server returned {status}")]
    Server { status: u16, info: Value },
    #[error("unexpected search response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("aggregation `{0}` missing from response")]
    MissingAggregation(String),
    #[error("server repeated after_key {0}")]
    RepeatedAfterKey(Value),
}

impl SearchError {
    /// Structured diagnostic payload returned by the server, if any.
    pub fn info(&self) -> Option<&Value> {
        match self {
            SearchError::Server { info, .. } if info.is_object() => Some(info),
            _ => None,
        }
    }
}
