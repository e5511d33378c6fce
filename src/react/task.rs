//! 研究任务与终止结果

use serde::{Deserialize, Serialize};

use crate::memory::Message;

pub const DEFAULT_TURN_LIMIT: usize = 100;
pub const DEFAULT_TOKEN_BUDGET: usize = 108 * 1024;

/// 一次研究会话的输入；创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    pub turn_limit: usize,
    /// 主对话的输入 token 上限（估算值）
    pub token_budget: usize,
}

impl Task {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ground_truth: None,
            turn_limit: DEFAULT_TURN_LIMIT,
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    pub fn with_ground_truth(mut self, answer: impl Into<String>) -> Self {
        self.ground_truth = Some(answer.into());
        self
    }

    pub fn with_turn_limit(mut self, turns: usize) -> Self {
        self.turn_limit = turns.max(1);
        self
    }

    pub fn with_token_budget(mut self, tokens: usize) -> Self {
        self.token_budget = tokens;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    AnswerFound,
    TurnLimitExceeded,
    FatalError,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Termination::AnswerFound => "answer_found",
            Termination::TurnLimitExceeded => "turn_limit_exceeded",
            Termination::FatalError => "fatal_error",
        };
        f.write_str(s)
    }
}

/// 研究循环的输出
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationResult {
    pub status: Termination,
    /// answer 区域原文；fatal_error 时可能是最后一段输出或错误说明
    pub prediction: Option<String>,
    pub messages: Vec<Message>,
    /// 实际发起的生成次数
    pub turns: usize,
    /// 非 answer_found 时的原因说明
    pub reason: Option<String>,
}

/// 交给外部报告层的会话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub question: String,
    /// 参考答案（如有）
    pub answer: Option<String>,
    pub prediction: String,
    pub termination: Termination,
    pub messages: Vec<Message>,
}

impl SessionRecord {
    pub fn new(task: &Task, result: TerminationResult) -> Self {
        Self {
            question: task.question.clone(),
            answer: task.ground_truth.clone(),
            prediction: result.prediction.unwrap_or_default(),
            termination: result.status,
            messages: result.messages,
        }
    }
}
