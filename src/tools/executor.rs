//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时：execute 在超时内调用 registry.dispatch，超时转为 sentinel；
//! execute_batch 并发执行同一轮的全部调用，结果按调用出现顺序返回。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::tools::{ToolCall, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时，并输出审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个调用；永不返回错误，失败都体现在 ToolResult.status
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let result = match timeout(self.timeout, self.registry.dispatch(call)).await {
            Ok(r) => r,
            Err(_) => ToolResult::error(
                &call.call_id,
                &call.name,
                format!(
                    "[Tool Error]: '{}' did not finish within {}s.",
                    call.name,
                    self.timeout.as_secs()
                ),
            ),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.call_id,
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "content_chars": result.content.chars().count(),
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");
        result
    }

    /// 同一轮的调用相互独立，并发执行；返回顺序与 calls 一致
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|c| self.execute(c))).await
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
