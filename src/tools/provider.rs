//! 外部检索 Provider 抽象
//!
//! Search / Visit 两个工具只依赖 WebProvider：排序检索（search）与批量正文抽取（extract）。
//! 具体实现见 tavily.rs（HTTP）与 mock.rs（测试）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Transient;

/// Provider 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 未配置凭据，不发起任何网络请求
    #[error("TAVILY_API_KEY environment variable not set.")]
    MissingApiKey,

    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Connect(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::MissingApiKey | ProviderError::Decode(_) => false,
        }
    }
}

/// 单条检索结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

fn default_title() -> String {
    "No title".to_string()
}

/// 一次检索的响应：排序结果 + 可选的合成短答案
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// 成功抽取的页面
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPage {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub raw_content: String,
}

/// 抽取失败的 URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExtraction {
    #[serde(default = "default_failed_url")]
    pub url: String,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_url() -> String {
    "Unknown URL".to_string()
}

fn default_failed_url() -> String {
    "unknown".to_string()
}

/// 批量抽取响应：成功与失败分开列出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResponse {
    #[serde(default)]
    pub results: Vec<ExtractedPage>,
    #[serde(default)]
    pub failed_results: Vec<FailedExtraction>,
}

/// 只读的外部检索服务；所有调用幂等，可安全重试
#[async_trait]
pub trait WebProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError>;

    async fn extract(&self, urls: &[String]) -> Result<ExtractResponse, ProviderError>;
}
