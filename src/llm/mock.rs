//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预先给定的回复，并记录每次请求收到的消息，便于断言对话结构与调用次数。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{CompletionStream, LlmClient, LlmError};
use crate::memory::Message;

/// 脚本化客户端：每次 complete 弹出一条预设结果；脚本耗尽后返回 Api 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    /// 流式输出时每个片段的字符数；None 表示整段输出
    chunk_chars: Option<usize>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: None,
        }
    }

    /// 流式输出按 n 个字符切片，用于覆盖跨片段的标记识别
    pub fn with_chunk_chars(mut self, n: usize) -> Self {
        self.chunk_chars = Some(n.max(1));
        self
    }

    /// 已发生的请求次数
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次请求收到的消息快照
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(messages.to_vec());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::Api("mock script exhausted".to_string())))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<CompletionStream, LlmError> {
        let content = self.complete(messages).await?;
        let chunks: Vec<Result<String, LlmError>> = match self.chunk_chars {
            Some(n) => content
                .chars()
                .collect::<Vec<_>>()
                .chunks(n)
                .map(|c| Ok(c.iter().collect()))
                .collect(),
            None => vec![Ok(content)],
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}
