//! Mock Provider（用于测试，无网络）
//!
//! 确定性地按 query 返回预设检索结果；记录网络调用次数与每次抽取的 URL，
//! 便于断言「无效 URL 不会触达 Provider」「重试次数」等性质。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::tools::{ExtractResponse, ProviderError, SearchResponse, WebProvider};

#[derive(Debug, Default)]
pub struct MockWebProvider {
    searches: HashMap<String, Result<SearchResponse, ProviderError>>,
    extract: Option<Result<ExtractResponse, ProviderError>>,
    /// 前 n 次调用（search 与 extract 合计）统一失败
    fail_first: Option<(usize, ProviderError)>,
    missing_key: bool,
    search_calls: AtomicUsize,
    extract_calls: AtomicUsize,
    extracted: Mutex<Vec<Vec<String>>>,
}

impl MockWebProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, query: impl Into<String>, resp: SearchResponse) -> Self {
        self.searches.insert(query.into(), Ok(resp));
        self
    }

    pub fn with_search_error(mut self, query: impl Into<String>, err: ProviderError) -> Self {
        self.searches.insert(query.into(), Err(err));
        self
    }

    pub fn with_extract(mut self, resp: ExtractResponse) -> Self {
        self.extract = Some(Ok(resp));
        self
    }

    pub fn with_extract_error(mut self, err: ProviderError) -> Self {
        self.extract = Some(Err(err));
        self
    }

    pub fn fail_first(mut self, n: usize, err: ProviderError) -> Self {
        self.fail_first = Some((n, err));
        self
    }

    /// 模拟未配置凭据：立即返回 MissingApiKey，不计为网络调用
    pub fn without_credentials(mut self) -> Self {
        self.missing_key = true;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    /// 每次 extract 收到的 URL 列表
    pub fn extracted_urls(&self) -> Vec<Vec<String>> {
        self.extracted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn injected_failure(&self) -> Option<ProviderError> {
        let total = self.search_calls() + self.extract_calls();
        match &self.fail_first {
            Some((n, err)) if total <= *n => Some(err.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl WebProvider for MockWebProvider {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        if self.missing_key {
            return Err(ProviderError::MissingApiKey);
        }
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        self.searches
            .get(query)
            .cloned()
            .unwrap_or_else(|| Ok(SearchResponse::default()))
    }

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse, ProviderError> {
        if self.missing_key {
            return Err(ProviderError::MissingApiKey);
        }
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut v) = self.extracted.lock() {
            v.push(urls.to_vec());
        }
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        self.extract
            .clone()
            .unwrap_or_else(|| Ok(ExtractResponse::default()))
    }
}
