//! Extractor：目标驱动的二次压缩
//!
//! 每个成功的工具结果在进入主对话前，先用一次独立的 LLM 调用按目标提炼成
//! {rational, evidence, summary} 三段；原始网页可能有数万字符，直接放进对话几轮就会撑爆输入预算。
//! 二次调用失败时退化为保守截断的原文，不丢这一轮。
//! 多页 visit 结果按页面分别提炼（并发），避免后面的页面被输入上限截掉。

use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{RetryPolicy, Transient};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{truncate_with_marker, Message};
use crate::react::prompt::extractor_prompt;
use crate::tools::visit::{split_pages, PAGE_SEPARATOR};

pub const EXTRACTION_FALLBACK_MARKER: &str = "\n... [content truncated: extraction unavailable]";
const EXTRACTOR_INPUT_MARKER: &str = "\n... [content truncated]";

/// 压缩后的结构化笔记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedNote {
    #[serde(rename = "rational")]
    pub rationale: String,
    pub evidence: String,
    pub summary: String,
}

impl ExtractedNote {
    /// 写入 tool 消息的文本形式
    pub fn render(&self, source: &str, goal: &str) -> String {
        format!(
            "The useful information in {source} for user goal \"{goal}\" as follows:\n\nRationale:\n{}\n\nEvidence in page:\n{}\n\nSummary:\n{}\n",
            self.rationale.trim(),
            self.evidence.trim(),
            self.summary.trim()
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("extractor LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("extractor output is not the expected JSON object: {0}")]
    InvalidOutput(String),
}

impl Transient for ExtractError {
    fn is_transient(&self) -> bool {
        match self {
            ExtractError::Llm(e) => e.is_transient(),
            // 重新采样通常能得到合法 JSON
            ExtractError::InvalidOutput(_) => true,
        }
    }
}

pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    /// 短于此长度的结果不压缩，原样写入
    min_chars: usize,
    /// 送入二次调用的原文上限
    max_input_chars: usize,
    /// 失败时保留的原文长度
    fallback_chars: usize,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retry: RetryPolicy::default(),
            min_chars: 0,
            max_input_chars: 100_000,
            fallback_chars: 10_000,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, min_chars: usize, max_input_chars: usize, fallback_chars: usize) -> Self {
        self.min_chars = min_chars;
        self.max_input_chars = max_input_chars;
        self.fallback_chars = fallback_chars;
        self
    }

    pub fn should_compress(&self, raw: &str) -> bool {
        raw.chars().count() >= self.min_chars
    }

    /// 一次目标驱动的压缩调用（含重试）
    pub async fn compress(&self, raw: &str, goal: &str) -> Result<ExtractedNote, ExtractError> {
        let content = truncate_with_marker(raw, self.max_input_chars, EXTRACTOR_INPUT_MARKER);
        let messages = vec![Message::user(extractor_prompt(&content, goal))];
        let messages = &messages;
        let llm = &self.llm;
        self.retry
            .run("extractor", move || async move {
                let output = llm.complete(messages).await?;
                parse_note(&output)
            })
            .await
    }

    /// 按工具结果提炼；多页 visit 结果逐页提炼后按原顺序拼接
    pub async fn distill(&self, raw: &str, goal: &str, tool: &str) -> String {
        let pages = if tool == "visit" { split_pages(raw) } else { Vec::new() };
        if pages.len() < 2 {
            return self.distill_one(raw, goal, &format!("the {tool} result")).await;
        }
        tracing::debug!(pages = pages.len(), "distilling visit result per page");
        join_all(pages.iter().map(|(url, section)| self.distill_one(section, goal, url)))
            .await
            .join(PAGE_SEPARATOR)
    }

    /// compress 失败时退化为截断原文
    async fn distill_one(&self, raw: &str, goal: &str, source: &str) -> String {
        match self.compress(raw, goal).await {
            Ok(note) => note.render(source, goal),
            Err(e) => {
                tracing::warn!(error = %e, source = %source, "extraction failed, passing truncated content");
                truncate_with_marker(raw, self.fallback_chars, EXTRACTION_FALLBACK_MARKER)
            }
        }
    }
}

/// 从模型输出中取出 JSON 对象；evidence / summary 必须存在，rational 可缺省
pub fn parse_note(output: &str) -> Result<ExtractedNote, ExtractError> {
    let start = output.find('{');
    let end = output.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if s < e => &output[s..=e],
        _ => return Err(ExtractError::InvalidOutput("no JSON object found".to_string())),
    };
    let value: Value =
        serde_json::from_str(json_str).map_err(|e| ExtractError::InvalidOutput(e.to_string()))?;

    let field = |name: &str| value.get(name).map(text_of);
    let evidence = field("evidence")
        .ok_or_else(|| ExtractError::InvalidOutput("missing \"evidence\"".to_string()))?;
    let summary = field("summary")
        .ok_or_else(|| ExtractError::InvalidOutput("missing \"summary\"".to_string()))?;
    let rationale = field("rational").or_else(|| field("rationale")).unwrap_or_default();

    if evidence.trim().is_empty() && summary.trim().is_empty() {
        return Err(ExtractError::InvalidOutput("empty evidence and summary".to_string()));
    }
    Ok(ExtractedNote {
        rationale,
        evidence,
        summary,
    })
}

/// 字段可能是字符串，也可能是字符串数组（多段证据）
fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
