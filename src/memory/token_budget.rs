//! Token 预算控制
//!
//! 研究循环在每次生成前调用 BudgetPolicy::enforce：超过压缩阈值先压缩旧 tool 消息，
//! 压缩后仍超过上限则判定预算耗尽（由循环强制模型作答）。

use crate::memory::Conversation;

/// 超长单条消息被截断时追加的标记
pub const MESSAGE_CUT_MARKER: &str = "\n... [message cut to the per-message limit]";

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

/// 按字符截断，截断时追加 marker；未截断时原样返回（不加 marker）
pub fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], marker),
        None => text.to_string(),
    }
}

/// enforce 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    /// 在阈值内，无需处理
    WithinBudget,
    /// 压缩了 n 条旧 tool 消息后回到上限以内
    Compressed(usize),
    /// 压缩后仍超过 max_input_tokens
    Exhausted,
}

/// 可调的预算策略（默认值见 config/default.toml 的 [agent] 段）
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    /// 模型输入上限（估算 token）
    pub max_input_tokens: usize,
    /// 超过 max_input_tokens * compress_ratio 时开始压缩
    pub compress_ratio: f64,
    /// 最近的若干条 tool 消息不压缩
    pub keep_recent_tool_messages: usize,
    /// 旧 tool 消息压缩后的字符上限
    pub compressed_tool_chars: usize,
    /// 单条消息的字符上限
    pub max_message_chars: usize,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            max_input_tokens: 108 * 1024,
            compress_ratio: 0.8,
            keep_recent_tool_messages: 2,
            compressed_tool_chars: 2_000,
            max_message_chars: 60_000,
        }
    }
}

impl BudgetPolicy {
    pub fn compress_threshold(&self) -> usize {
        (self.max_input_tokens as f64 * self.compress_ratio.clamp(0.0, 1.0)) as usize
    }

    /// 单条消息超出上限时截断并加可见标记
    pub fn bound_message(&self, content: String) -> String {
        if content.chars().count() > self.max_message_chars {
            truncate_with_marker(&content, self.max_message_chars, MESSAGE_CUT_MARKER)
        } else {
            content
        }
    }

    pub fn enforce(&self, conversation: &mut Conversation) -> BudgetVerdict {
        let tokens = conversation.estimated_tokens();
        if tokens <= self.compress_threshold() {
            return BudgetVerdict::WithinBudget;
        }
        let compressed = conversation
            .compress_tool_messages(self.keep_recent_tool_messages, self.compressed_tool_chars);
        let after = conversation.estimated_tokens();
        tracing::info!(before = tokens, after, compressed, "context compression");
        if after > self.max_input_tokens {
            BudgetVerdict::Exhausted
        } else if compressed > 0 {
            BudgetVerdict::Compressed(compressed)
        } else {
            BudgetVerdict::WithinBudget
        }
    }
}
