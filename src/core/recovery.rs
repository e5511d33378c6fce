//! 错误恢复引擎
//!
//! 根据生成阶段的错误类型返回 RecoveryAction，供研究循环决定是重试、压缩上下文还是终止。

use crate::core::{AgentError, RecoveryAction, Transient};
use crate::llm::LlmError;

/// 语义化错误恢复：将错误映射为可执行动作（重试 / 压缩 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempt 为本轮已经失败的次数（从 1 开始），max_attempts 为配置的生成重试上限
    pub fn handle(&self, err: &AgentError, attempt: usize, max_attempts: usize) -> RecoveryAction {
        match err {
            AgentError::LlmError(LlmError::ContextLength(_)) if attempt < max_attempts => {
                RecoveryAction::CompressContext
            }
            AgentError::LlmError(e) if e.is_transient() && attempt < max_attempts => {
                RecoveryAction::RetryGeneration
            }
            _ => RecoveryAction::Abort,
        }
    }
}
