use crate::error::{Result, SearchError};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Subset of the `_search` / `_search/scroll` response body used by the pagers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub hits: Hits,
    #[serde(default)]
    pub aggregations: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// Elasticsearch 6 reports a bare number, 7+ and OpenSearch an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Count(u64),
    Tracked { value: u64 },
}

impl TotalHits {
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Count(value) | TotalHits::Tracked { value } => *value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl Hit {
    pub fn from_source(source: Value) -> Self {
        Self { id: None, source }
    }

    /// Decode `_source` into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.source)?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompositeAggregation {
    #[serde(default)]
    pub after_key: Option<Value>,
    #[serde(default)]
    pub buckets: Vec<CompositeBucket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompositeBucket {
    pub key: Map<String, Value>,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

impl CompositeBucket {
    /// Value of a single-value metric sub-aggregation (`sum`, `avg`, ...).
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name)?.get("value")?.as_f64()
    }
}

impl SearchResponse {
    pub fn total_hits(&self) -> Option<u64> {
        self.hits.total.as_ref().map(TotalHits::value)
    }

    pub fn composite(&self, name: &str) -> Result<CompositeAggregation> {
        let aggregation = self
            .aggregations
            .as_ref()
            .and_then(|aggs| aggs.get(name))
            .ok_or_else(|| SearchError::MissingAggregation(name.to_string()))?;
        Ok(CompositeAggregation::deserialize(aggregation)?)
    }

    /// Value of a top-level single-value metric or pipeline aggregation.
    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.aggregations
            .as_ref()?
            .get(name)?
            .get("value")?
            .as_f64()
    }
}
