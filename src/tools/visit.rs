//! Visit 工具：批量抽取网页正文
//!
//! 只放行 http/https URL；全部不合格时不请求 Provider 直接返回错误。
//! 单页正文超过 max_content_chars（默认 50,000 字符）时截断并追加 `... [content truncated]`，
//! 控制进入压缩阶段（以及间接进入主对话）的数据量。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::RetryPolicy;
use crate::memory::truncate_with_marker;
use crate::tools::{parameters_schema, ExtractResponse, ProviderError, Tool, ToolArgs, VisitArgs, WebProvider};

pub const MAX_CONTENT_CHARS: usize = 50_000;
pub const TRUNCATION_MARKER: &str = "\n... [content truncated]";
pub const NO_VALID_URLS: &str =
    "[Visit] Error: No valid URLs provided (must start with http:// or https://)";
/// 各页面段落之间的分隔符
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";
/// 每个页面段落的标题前缀
pub const PAGE_HEADING: &str = "## Content from ";

pub struct VisitTool {
    provider: Arc<dyn WebProvider>,
    retry: RetryPolicy,
    max_content_chars: usize,
}

/// 是否为可接受的 URL scheme
pub fn is_fetchable_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl VisitTool {
    pub fn new(provider: Arc<dyn WebProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            max_content_chars: MAX_CONTENT_CHARS,
        }
    }

    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    pub async fn run(&self, urls: &[String], goal: &str) -> Result<String, String> {
        let valid: Vec<String> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| is_fetchable_url(u))
            .map(String::from)
            .collect();
        if valid.is_empty() {
            return Err(NO_VALID_URLS.to_string());
        }
        tracing::info!(urls = valid.len(), dropped = urls.len() - valid.len(), "visit tool");

        match self
            .retry
            .run("visit extract", || self.provider.extract(&valid))
            .await
        {
            Ok(resp) => self.format_pages(&resp, goal),
            Err(ProviderError::MissingApiKey) => {
                Err(format!("[Visit Error]: {}", ProviderError::MissingApiKey))
            }
            Err(ProviderError::Timeout) => {
                Err("[Visit Error]: Timeout while extracting content from URLs.".to_string())
            }
            Err(e) => Err(format!("[Visit Error]: Failed to extract content: {e}")),
        }
    }

    /// 全部失败 → 错误；部分失败 → 只输出成功的页面
    fn format_pages(&self, resp: &ExtractResponse, goal: &str) -> Result<String, String> {
        if resp.results.is_empty() {
            if resp.failed_results.is_empty() {
                return Err(
                    "[Visit Error]: No content could be extracted from the provided URLs."
                        .to_string(),
                );
            }
            let failed: Vec<&str> = resp.failed_results.iter().map(|f| f.url.as_str()).collect();
            return Err(format!(
                "[Visit Error]: Failed to extract content from: {}",
                failed.join(", ")
            ));
        }

        let sections: Vec<String> = resp
            .results
            .iter()
            .map(|page| {
                let content =
                    truncate_with_marker(&page.raw_content, self.max_content_chars, TRUNCATION_MARKER);
                format!("{PAGE_HEADING}{}\n\n{}", page.url, content)
            })
            .collect();

        Ok(format!(
            "Extracted content for goal: {}\n\n{}",
            goal,
            sections.join(PAGE_SEPARATOR)
        ))
    }
}

/// 把 visit 输出拆回页面：(url, 含标题的段落)。只在「分隔符 + 页面标题」处切分，
/// 正文里自带的 `---` 不会误切。不含页面标题时返回空
pub fn split_pages(content: &str) -> Vec<(&str, &str)> {
    let Some(first) = content.find(PAGE_HEADING) else {
        return Vec::new();
    };
    let boundary = format!("{PAGE_SEPARATOR}{PAGE_HEADING}");
    let mut sections = Vec::new();
    let mut rest = &content[first..];
    while let Some(idx) = rest.find(&boundary) {
        sections.push(&rest[..idx]);
        rest = &rest[idx + PAGE_SEPARATOR.len()..];
    }
    sections.push(rest);

    sections
        .into_iter()
        .map(|section| {
            let url = section[PAGE_HEADING.len()..]
                .lines()
                .next()
                .unwrap_or_default()
                .trim();
            (url, section)
        })
        .collect()
}

#[async_trait]
impl Tool for VisitTool {
    fn name(&self) -> &str {
        "visit"
    }

    fn description(&self) -> &str {
        "Visit webpage(s) and return the summary of the content."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<VisitArgs>()
    }

    async fn execute(&self, args: ToolArgs) -> Result<String, String> {
        match args {
            ToolArgs::Visit(VisitArgs { urls, goal }) => self.run(&urls, &goal).await,
            other => Err(format!("[Visit] Error: unexpected arguments {other:?}")),
        }
    }
}
