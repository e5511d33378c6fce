//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册；dispatch 先校验参数再路由，任何失败都变成 status=error 的 ToolResult。
//! 注册表在 Agent 初始化时显式构建并注入研究循环，没有全局注册状态。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolArgs, ToolCall, ToolResult};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（参数已校验）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应 tool_call 中的 "name"）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value;

    /// 执行工具；Err 内容即 sentinel 错误文本
    async fn execute(&self, args: ToolArgs) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>；BTreeMap 保证工具列表顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 校验并路由一次调用；未知工具、参数不合法、工具失败都返回 status=error
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return ToolResult::error(
                &call.call_id,
                &call.name,
                format!(
                    "[Tool Error]: Unknown tool '{}'. Available tools: {}",
                    call.name,
                    self.tool_names().join(", ")
                ),
            );
        };

        let args = match ToolArgs::parse(&call.name, &call.arguments) {
            Ok(a) => a,
            Err(e) => {
                return ToolResult::error(
                    &call.call_id,
                    &call.name,
                    format!(
                        "[Tool Error]: Invalid arguments for '{}': {}. Expected parameters schema: {}",
                        call.name,
                        e,
                        tool.parameters_schema()
                    ),
                )
            }
        };

        let goal = args.goal().map(String::from);
        let result = match tool.execute(args).await {
            Ok(content) => ToolResult::ok(&call.call_id, &call.name, content),
            Err(content) => ToolResult::error(&call.call_id, &call.name, content),
        };
        result.with_goal(goal)
    }

    /// `<tools>` 段落：每行一个 function 签名，拼入 system prompt
    pub fn to_tools_block(&self) -> String {
        self.tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    }
                })
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{parameters_schema, SearchArgs, ToolStatus};
    use serde_json::json;

    struct EchoSearch;

    #[async_trait]
    impl Tool for EchoSearch {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "echo queries"
        }

        fn parameters_schema(&self) -> Value {
            parameters_schema::<SearchArgs>()
        }

        async fn execute(&self, args: ToolArgs) -> Result<String, String> {
            match args {
                ToolArgs::Search(s) => Ok(s.queries.join("|")),
                _ => Err("wrong args".into()),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(EchoSearch);
        r
    }

    #[tokio::test]
    async fn test_dispatch_ok() {
        let call = ToolCall::new("search", json!({"query": ["a", "b"]}));
        let result = registry().dispatch(&call).await;
        assert_eq!(result.status, ToolStatus::Ok);
        assert_eq!(result.content, "a|b");
        assert_eq!(result.call_id, call.call_id);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let call = ToolCall::new("python", json!({}));
        let result = registry().dispatch(&call).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("Unknown tool 'python'"));
        assert!(result.content.contains("search"));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_args_describes_schema() {
        let call = ToolCall::new("search", json!({"q": "a"}));
        let result = registry().dispatch(&call).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("Expected parameters schema"));
        assert!(result.content.contains("\"query\""));
    }

    #[test]
    fn test_tools_block() {
        let block = registry().to_tools_block();
        let line: Value = serde_json::from_str(block.lines().next().unwrap()).unwrap();
        assert_eq!(line["type"], "function");
        assert_eq!(line["function"]["name"], "search");
    }
}
