//! Tavily HTTP Provider
//!
//! POST {base}/search 与 POST {base}/extract；api_key 放在请求体中。
//! 每次请求单独设超时（search 30s、extract 60s）；未配置 api_key 时直接返回 MissingApiKey。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::tools::{ExtractResponse, ProviderError, SearchResponse, WebProvider};

pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// Tavily 客户端
pub struct TavilyProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    search_timeout: Duration,
    extract_timeout: Duration,
    max_results: usize,
    search_depth: String,
    extract_depth: String,
}

impl TavilyProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("bee-research/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_TAVILY_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            search_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(60),
            max_results: 10,
            search_depth: "advanced".to_string(),
            extract_depth: "basic".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeouts(mut self, search: Duration, extract: Duration) -> Self {
        self.search_timeout = search;
        self.extract_timeout = extract;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_depths(mut self, search_depth: impl Into<String>, extract_depth: impl Into<String>) -> Self {
        self.search_depth = search_depth.into();
        self.extract_depth = extract_depth.into();
        self
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Decode(e.to_string())
            }
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Connect(e.to_string())
    }
}

#[async_trait]
impl WebProvider for TavilyProvider {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let api_key = self.api_key()?;
        let body = json!({
            "api_key": api_key,
            "query": query,
            "search_depth": self.search_depth,
            "include_answer": true,
            "include_raw_content": false,
            "max_results": self.max_results,
        });
        tracing::debug!(query = %query, "tavily search");
        self.post("search", body, self.search_timeout).await
    }

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse, ProviderError> {
        let api_key = self.api_key()?;
        let body = json!({
            "api_key": api_key,
            "urls": urls,
            "extract_depth": self.extract_depth,
            "include_images": false,
        });
        tracing::debug!(urls = urls.len(), "tavily extract");
        self.post("extract", body, self.extract_timeout).await
    }
}
