//! Search 工具：对每个 query 独立检索并格式化
//!
//! 多个 query 并发执行（各自独立重试），结果按输入顺序用 `=======` 分隔拼接；
//! 单个 query 失败只影响自己那一段（sentinel 文本），全部失败时整体为 error。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use crate::core::RetryPolicy;
use crate::tools::{parameters_schema, ProviderError, SearchArgs, SearchResponse, Tool, ToolArgs, WebProvider};

/// 多个 query 结果之间的分隔符
pub const QUERY_SEPARATOR: &str = "\n=======\n";

pub struct SearchTool {
    provider: Arc<dyn WebProvider>,
    retry: RetryPolicy,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn WebProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// 单个 query：Ok 为格式化结果（含「无结果」提示），Err 为 sentinel
    async fn search_one(&self, query: &str) -> Result<String, String> {
        let label = format!("search '{query}'");
        match self.retry.run(&label, || self.provider.search(query)).await {
            Ok(resp) => Ok(format_results(query, &resp)),
            Err(ProviderError::MissingApiKey) => {
                Err(format!("[Search Error]: {}", ProviderError::MissingApiKey))
            }
            Err(ProviderError::Timeout) => Err(format!(
                "[Search Error]: Timeout while searching for '{query}'. Please try again."
            )),
            Err(e) => Err(format!("[Search Error]: Failed to search for '{query}': {e}")),
        }
    }

    pub async fn run(&self, queries: &[String]) -> Result<String, String> {
        tracing::info!(queries = queries.len(), "search tool");
        let outcomes = join_all(queries.iter().map(|q| self.search_one(q))).await;
        let all_failed = outcomes.iter().all(|o| o.is_err());
        let sections: Vec<String> = outcomes
            .into_iter()
            .map(|o| match o {
                Ok(s) | Err(s) => s,
            })
            .collect();
        let joined = sections.join(QUERY_SEPARATOR);
        if all_failed {
            Err(joined)
        } else {
            Ok(joined)
        }
    }
}

/// 编号列表 + 可选 Quick Answer；无结果时给出放宽查询的建议
pub fn format_results(query: &str, resp: &SearchResponse) -> String {
    if resp.results.is_empty() {
        return format!("No results found for '{query}'. Try with a more general query.");
    }

    let snippets: Vec<String> = resp
        .results
        .iter()
        .enumerate()
        .map(|(idx, hit)| format!("{}. [{}]({})\n{}", idx + 1, hit.title, hit.url, hit.content))
        .collect();

    let mut parts = vec![format!(
        "A search for '{}' found {} results:",
        query,
        snippets.len()
    )];
    if let Some(answer) = resp.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        parts.push(format!("\n## Quick Answer\n{answer}"));
    }
    parts.push(format!("\n## Web Results\n{}", snippets.join("\n\n")));
    parts.join("\n")
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Perform web searches then returns a string of the top search results. Accepts multiple queries."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchArgs>()
    }

    async fn execute(&self, args: ToolArgs) -> Result<String, String> {
        match args {
            ToolArgs::Search(SearchArgs { queries }) => self.run(&queries).await,
            other => Err(format!("[Search] Error: unexpected arguments {other:?}")),
        }
    }
}
