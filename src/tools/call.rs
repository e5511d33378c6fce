//! 单次工具调用与其结果（每轮产生，折叠进对话后即丢弃）

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 从模型输出中解析出的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// call_id 留空，由研究循环按 (轮次, 区域序号) 分配
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: String::new(),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}

/// 会话内唯一且可复现的调用 id：第 turn 轮的第 index 个 tool_call 区域（均从 1 开始）
pub fn call_id_for(turn: usize, index: usize) -> String {
    format!("call_{turn}_{index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// 工具结果：内容要么是格式化后的证据，要么是 sentinel 错误文本，从不向上抛异常
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub status: ToolStatus,
    /// visit 的目标；Extractor 按它做压缩
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            status: ToolStatus::Ok,
            goal: None,
        }
    }

    pub fn error(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            status: ToolStatus::Error,
            goal: None,
        }
    }

    pub fn with_goal(mut self, goal: Option<String>) -> Self {
        self.goal = goal;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}
