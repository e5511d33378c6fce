//! 核心层：错误与恢复、通用重试策略

pub mod error;
pub mod recovery;
pub mod retry;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use retry::{RetryPolicy, Transient};
