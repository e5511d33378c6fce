//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryGeneration / CompressContext / Abort。
//! 工具侧的失败不走这里：它们在 ToolRegistry 内变成 sentinel 文本，作为 tool 消息回填给模型。

use thiserror::Error;

use crate::llm::LlmError;

/// 研究会话运行过程中可能出现的错误（配置、LLM、取消）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 上下文超过模型输入上限且已无可压缩的内容；循环据此强制作答，不视为错误终止
    #[error("Token budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 暂时性错误：稍后重新请求同一轮生成
    RetryGeneration,
    /// 上下文超长：压缩旧的 tool 消息后重试
    CompressContext,
    /// 终止当前会话（fatal_error）
    Abort,
}
