//! 记忆层：对话历史与 token 预算

pub mod conversation;
pub mod token_budget;

pub use conversation::{Conversation, Message, Role, COMPRESSED_MARKER};
pub use token_budget::{
    truncate_with_marker, BudgetPolicy, BudgetVerdict, TokenEstimator, MESSAGE_CUT_MARKER,
};
