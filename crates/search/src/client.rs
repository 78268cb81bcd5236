use crate::{
    error::{Result, SearchError},
    response::SearchResponse,
};
use async_trait::async_trait;
use mockall::automock;
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Requests the report pipelines issue against a search cluster.
#[automock]
#[async_trait]
pub trait SearchBackend {
    /// Plain `_search` request.
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse>;

    /// `_search` request that opens a scroll context kept alive for `keep_alive`.
    async fn open_scroll(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> Result<SearchResponse>;

    /// Next batch of an open scroll context.
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse>;

    /// Release a scroll context on the server.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// HTTP client for OpenSearch and Elasticsearch `_search` endpoints.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl OpenSearchClient {
    pub fn new(base_url: &str, timeout: Duration, credentials: Option<Credentials>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.request_url(method, self.base_url.join(path)?))
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "search request");

        let request = self.http.request(method, url);
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let info = serde_json::from_slice::<Value>(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
            return Err(SearchError::Server {
                status: status.as_u16(),
                info,
            });
        }

        Ok(body.to_vec())
    }

    async fn execute_json(&self, request: RequestBuilder) -> Result<SearchResponse> {
        let body = self.execute(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SearchBackend for OpenSearchClient {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
        let request = self
            .request(Method::POST, &format!("{index}/_search"))?
            .json(body);
        self.execute_json(request).await
    }

    async fn open_scroll(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> Result<SearchResponse> {
        let mut url = self.base_url.join(&format!("{index}/_search"))?;
        url.query_pairs_mut().append_pair("scroll", keep_alive);
        let request = self.request_url(Method::POST, url).json(body);
        self.execute_json(request).await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse> {
        let request = self
            .request(Method::POST, "_search/scroll")?
            .json(&json!({ "scroll": keep_alive, "scroll_id": scroll_id }));
        self.execute_json(request).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, "_search/scroll")?
            .json(&json!({ "scroll_id": [scroll_id] }));
        self.execute(request).await?;
        Ok(())
    }
}
