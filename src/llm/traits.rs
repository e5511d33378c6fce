//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式文本片段）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::core::Transient;
use crate::memory::Message;

/// 流式完成的片段流
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 调用错误；是否可重试由 Transient 决定
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("api error: {0}")]
    Api(String),
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited | LlmError::Transport(_) | LlmError::EmptyResponse
        )
    }
}

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成；默认把 complete 的结果作为单个片段
    async fn complete_stream(&self, messages: &[Message]) -> Result<CompletionStream, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::EmptyResponse.is_transient());
        assert!(!LlmError::Api("bad request".into()).is_transient());
        assert!(!LlmError::ContextLength("x".into()).is_transient());
    }
}
