//! 研究过程事件：供 CLI 的 --verbose 模式或其他前端实时展示轮次、工具调用、观察与结论

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 第几轮生成开始
    TurnStarted { turn: usize, max_turns: usize },
    /// 解析出的工具调用
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 工具调用失败或 tool_call 区域无法解析（以 sentinel 回填给模型）
    ToolFailure { tool: String, reason: String },
    /// 生成阶段的恢复动作（重试 / 压缩 / 终止）
    Recovery { action: String, detail: String },
    /// 预算压缩：压缩了多少条旧 tool 消息
    Compression { compressed: usize, estimated_tokens: usize },
    /// 最终结论
    Answer { text: String },
    Error { text: String },
}

/// Observation 预览最大字符数
pub const OBSERVATION_PREVIEW_CHARS: usize = 200;

pub fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
