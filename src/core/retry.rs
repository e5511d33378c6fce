//! 通用重试策略：外部调用（Provider HTTP、LLM 生成）共用
//!
//! 固定次数 + 线性退避；错误通过 `Transient` trait 区分暂时性 / 终止性，终止性错误立即返回。

use std::future::Future;
use std::time::Duration;

/// 错误是否值得重试（超时、连接失败、限流、5xx 等）
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// 可靠外部调用的重试参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次），至少为 1
    pub max_attempts: usize,
    /// 第 n 次失败后等待 n * backoff
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// 不等待的策略，测试里用
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// 执行 op，暂时性错误按策略重试；返回最后一次的错误
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(call = %label, attempt, error = %e, "transient failure, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * attempt as u32).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(call = %label, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
