//! 工具参数：按工具区分的强类型参数，在分发边界一次性校验
//!
//! 模型给出的 arguments 是任意 JSON；ToolArgs::parse 负责必填字段检查与标量→数组归一化
//! （单个 URL / query 字符串视为只含一个元素的列表）。参数 Schema 由 schemars 生成，拼入 system prompt。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 参数校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ArgsError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    #[serde(rename = "query")]
    #[schemars(length(min = 1))]
    #[schemars(
        description = "The list of search queries. Include multiple complementary search queries in a single call."
    )]
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VisitArgs {
    #[serde(rename = "url")]
    #[schemars(length(min = 1))]
    #[schemars(
        description = "The URL(s) of the webpage(s) to visit. Can be a single URL or an array of URLs."
    )]
    pub urls: Vec<String>,
    #[schemars(description = "The specific information goal for visiting webpage(s).")]
    pub goal: String,
}

/// 已校验的工具参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArgs {
    Search(SearchArgs),
    Visit(VisitArgs),
}

impl ToolArgs {
    /// 按工具名校验并归一化 arguments
    pub fn parse(tool: &str, args: &Value) -> Result<Self, ArgsError> {
        let obj = args
            .as_object()
            .ok_or_else(|| ArgsError("arguments must be a JSON object".to_string()))?;
        // 兼容 {"params": {...}} 包裹；顶层字段优先
        let primary = if tool == "visit" { "url" } else { "query" };
        let obj = match obj.get("params") {
            Some(Value::Object(inner)) if !obj.contains_key(primary) => inner,
            _ => obj,
        };
        match tool {
            "search" => {
                let queries = string_list(obj.get("query"), "query")?;
                Ok(ToolArgs::Search(SearchArgs { queries }))
            }
            "visit" => {
                let urls = string_list(obj.get("url"), "url")?;
                let goal = obj
                    .get("goal")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .ok_or_else(|| ArgsError("missing required string field 'goal'".to_string()))?;
                Ok(ToolArgs::Visit(VisitArgs {
                    urls,
                    goal: goal.to_string(),
                }))
            }
            other => Err(ArgsError(format!("no argument schema for tool '{other}'"))),
        }
    }

    /// 目标描述（Extractor 用）；search 没有目标
    pub fn goal(&self) -> Option<&str> {
        match self {
            ToolArgs::Search(_) => None,
            ToolArgs::Visit(v) => Some(&v.goal),
        }
    }
}

/// 字符串或字符串数组 → 非空 Vec<String>
fn string_list(value: Option<&Value>, field: &str) -> Result<Vec<String>, ArgsError> {
    let value = value.ok_or_else(|| ArgsError(format!("missing required field '{field}'")))?;
    let items: Vec<String> = match value {
        Value::String(s) => vec![s.trim().to_string()],
        Value::Array(arr) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| ArgsError(format!("'{field}' must contain only strings")))
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(ArgsError(format!(
                "'{field}' must be a string or an array of strings"
            )))
        }
    };
    if items.is_empty() || items.iter().any(|s| s.is_empty()) {
        return Err(ArgsError(format!("'{field}' must contain at least one non-empty string")));
    }
    Ok(items)
}

/// 生成参数 Schema（去掉 $schema / title，只保留 object 描述）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}
