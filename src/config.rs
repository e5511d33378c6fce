//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RESEARCH__*` 覆盖（双下划线表示嵌套，如 `RESEARCH__AGENT__MAX_TURNS=30`）。
//! 凭据与模型另有惯用环境变量兜底：TAVILY_API_KEY、OPENAI_API_KEY、OPENAI_BASE_URL、OPENAI_MODEL。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::llm::GenerationParams;
use crate::memory::BudgetPolicy;
use crate::react::LoopSettings;
use crate::tools::tavily::DEFAULT_TAVILY_BASE_URL;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub extractor: ExtractorSection,
    pub provider: ProviderSection,
    pub agent: AgentSection,
}

/// [llm] 段：主模型与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    /// 单轮生成的最大尝试次数
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.6,
            top_p: 0.95,
            presence_penalty: 1.1,
            max_retries: 10,
            retry_backoff_ms: 1_000,
            request_timeout_secs: 600,
        }
    }
}

/// [extractor] 段：二次压缩调用；model 为空时沿用主模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSection {
    pub model: Option<String>,
    pub min_chars: usize,
    pub max_input_chars: usize,
    pub fallback_chars: usize,
    pub max_attempts: usize,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            model: None,
            min_chars: 0,
            max_input_chars: 100_000,
            fallback_chars: 10_000,
            max_attempts: 3,
        }
    }
}

/// [provider] 段：Tavily 检索 / 抽取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub search_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    pub max_results: usize,
    pub search_depth: String,
    pub extract_depth: String,
    /// visit 单页正文上限（字符）
    pub max_page_chars: usize,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TAVILY_BASE_URL.to_string(),
            api_key: None,
            search_timeout_secs: 30,
            extract_timeout_secs: 60,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_results: 10,
            search_depth: "advanced".to_string(),
            extract_depth: "basic".to_string(),
            max_page_chars: 50_000,
        }
    }
}

/// [agent] 段：轮数、墙钟、上下文预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    /// 0 表示不限
    pub max_wall_clock_secs: u64,
    pub max_input_tokens: usize,
    pub compress_ratio: f64,
    pub keep_recent_tool_messages: usize,
    pub compressed_tool_chars: usize,
    pub max_message_chars: usize,
    pub max_plain_nudges: usize,
    /// 单次工具调用超时（秒），包含 Provider 重试
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 100,
            max_wall_clock_secs: 150 * 60,
            max_input_tokens: 108 * 1024,
            compress_ratio: 0.8,
            keep_recent_tool_messages: 2,
            compressed_tool_chars: 2_000,
            max_message_chars: 60_000,
            max_plain_nudges: 2,
            tool_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// 未在配置中给出的凭据 / 模型从惯用环境变量补齐
    pub fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if is_blank(&self.provider.api_key) {
            self.provider.api_key = get("TAVILY_API_KEY");
        }
        if is_blank(&self.llm.api_key) {
            self.llm.api_key = get("OPENAI_API_KEY");
        }
        if is_blank(&self.llm.base_url) {
            self.llm.base_url = get("OPENAI_BASE_URL");
        }
        if let Some(model) = get("OPENAI_MODEL") {
            if self.llm.model == LlmSection::default().model {
                self.llm.model = model;
            }
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.llm.temperature,
            top_p: self.llm.top_p,
            presence_penalty: self.llm.presence_penalty,
        }
    }

    pub fn provider_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.provider.max_attempts,
            Duration::from_millis(self.provider.retry_backoff_ms),
        )
    }

    pub fn extractor_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.extractor.max_attempts,
            Duration::from_millis(self.llm.retry_backoff_ms),
        )
    }

    pub fn budget_policy(&self) -> BudgetPolicy {
        BudgetPolicy {
            max_input_tokens: self.agent.max_input_tokens,
            compress_ratio: self.agent.compress_ratio,
            keep_recent_tool_messages: self.agent.keep_recent_tool_messages,
            compressed_tool_chars: self.agent.compressed_tool_chars,
            max_message_chars: self.agent.max_message_chars,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_generation_attempts: self.llm.max_retries.max(1),
            generation_backoff: Duration::from_millis(self.llm.retry_backoff_ms),
            max_plain_nudges: self.agent.max_plain_nudges,
            max_wall_clock: (self.agent.max_wall_clock_secs > 0)
                .then(|| Duration::from_secs(self.agent.max_wall_clock_secs)),
            budget: self.budget_policy(),
        }
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// 从 config 目录加载配置，环境变量 RESEARCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 叠加环境变量 RESEARCH__*（双下划线表示嵌套键）
/// 4. 凭据兜底：TAVILY_API_KEY / OPENAI_API_KEY / OPENAI_BASE_URL / OPENAI_MODEL
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    load_config_with_env(config_path, None)
}

/// env 为 None 时读取进程环境；给定时只用这份变量表（覆盖与兜底都从中取）
pub fn load_config_with_env(
    config_path: Option<PathBuf>,
    env: Option<config::Map<String, String>>,
) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RESEARCH")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env.clone()),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    match env {
        Some(vars) => cfg.apply_env_fallbacks(|key| vars.get(key).cloned()),
        None => cfg.apply_env_fallbacks(|key| std::env::var(key).ok()),
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_input_tokens, 110_592);
        assert_eq!(cfg.llm.max_retries, 10);
        assert_eq!(cfg.provider.max_attempts, 3);
        assert_eq!(cfg.budget_policy().compress_threshold(), 88_473);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_turns = 7\nmax_wall_clock_secs = 0\n\n[provider]\nsearch_depth = \"basic\"\n\n[llm]\nmodel = \"qwen\"\napi_key = \"sk-file\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_turns, 7);
        assert_eq!(cfg.provider.search_depth, "basic");
        assert_eq!(cfg.llm.model, "qwen");
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-file"));
        // 未写出的键保持默认
        assert_eq!(cfg.agent.max_plain_nudges, 2);
        assert_eq!(cfg.loop_settings().max_wall_clock, None);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_prefixed_env_overrides_nested_keys() {
        let env: config::Map<String, String> = [
            ("RESEARCH__AGENT__MAX_TURNS", "12"),
            ("RESEARCH__PROVIDER__SEARCH_DEPTH", "basic"),
            ("RESEARCH__PROVIDER__MAX_PAGE_CHARS", "2000"),
            ("RESEARCH__LLM__TEMPERATURE", "0.2"),
            ("TAVILY_API_KEY", "tvly-env"),
            ("UNRELATED__AGENT__MAX_TURNS", "99"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg = load_config_with_env(None, Some(env)).unwrap();
        assert_eq!(cfg.agent.max_turns, 12);
        assert_eq!(cfg.provider.search_depth, "basic");
        assert_eq!(cfg.provider.max_page_chars, 2_000);
        assert!((cfg.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.provider.api_key.as_deref(), Some("tvly-env"));
        assert_eq!(cfg.agent.max_plain_nudges, 2);
    }

    #[test]
    fn test_env_overrides_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[agent]\nmax_turns = 7").unwrap();
        let env: config::Map<String, String> = [("RESEARCH__AGENT__MAX_TURNS".to_string(), "30".to_string())]
            .into_iter()
            .collect();
        let cfg = load_config_with_env(Some(file.path().to_path_buf()), Some(env)).unwrap();
        assert_eq!(cfg.agent.max_turns, 30);
    }

    #[test]
    fn test_env_fallbacks_fill_only_blanks() {
        let env: HashMap<&str, &str> = [
            ("TAVILY_API_KEY", "tvly-env"),
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_MODEL", "env-model"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let mut cfg = AppConfig::default();
        cfg.llm.api_key = Some("sk-config".into());
        cfg.apply_env_fallbacks(lookup);
        assert_eq!(cfg.provider.api_key.as_deref(), Some("tvly-env"));
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-config"));
        assert_eq!(cfg.llm.model, "env-model");
        assert_eq!(cfg.llm.base_url, None);
    }
}
