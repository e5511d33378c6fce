//! 对话历史
//!
//! 有序消息序列：只追加；唯一的例外是预算压缩时就地缩短旧的 tool 消息（带可见标记）。

use serde::{Deserialize, Serialize};

use crate::memory::{truncate_with_marker, TokenEstimator};

/// 压缩旧 tool 消息时追加的标记
pub const COMPRESSED_MARKER: &str = "\n... [compressed to fit the context budget]";

/// 消息角色（与 LLM API 一致，多一个 tool）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息；tool 消息带 tool_call_id，对应触发它的 ToolCall
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// 研究会话的对话：会话开始时创建，TerminationResult 产出时交出所有权
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// 一次性追加一整轮的消息（助手输出 + 全部 tool 结果），读者不会看到半轮状态
    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 整个对话的估算 token 数
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| TokenEstimator::estimate(&m.content))
            .sum()
    }

    /// 压缩除最近 keep_recent 条以外的 tool 消息到 max_chars，返回实际被压缩的条数
    pub fn compress_tool_messages(&mut self, keep_recent: usize, max_chars: usize) -> usize {
        let tool_indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::Tool)
            .map(|(i, _)| i)
            .collect();
        let older = tool_indices.len().saturating_sub(keep_recent);
        let mut compressed = 0;
        for &idx in &tool_indices[..older] {
            let msg = &mut self.messages[idx];
            if msg.content.ends_with(COMPRESSED_MARKER) {
                continue;
            }
            if msg.content.chars().count() > max_chars {
                msg.content = truncate_with_marker(&msg.content, max_chars, COMPRESSED_MARKER);
                compressed += 1;
            }
        }
        compressed
    }
}
