//! Headless Agent 运行时
//!
//! AgentComponents::from_config 按配置组装 LLM、Tavily Provider、search / visit 工具、Extractor 与循环参数；
//! run_task 对单个 Task 跑研究循环。组件可在多个 Task 之间共享。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{LlmClient, OpenAiClient};
use crate::react::prompt::system_prompt_today;
use crate::react::{Extractor, LoopSettings, ReactEvent, ReactSession, Task, TerminationResult};
use crate::tools::{SearchTool, TavilyProvider, ToolExecutor, ToolRegistry, VisitTool, WebProvider};

/// 预构建的 Agent 组件
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub executor: ToolExecutor,
    pub extractor: Extractor,
    pub recovery: RecoveryEngine,
    pub system_prompt: String,
    pub settings: LoopSettings,
    /// 新建 Task 的默认轮数上限
    pub max_turns: usize,
}

impl AgentComponents {
    /// 从配置创建：OpenAI 兼容主模型 + Extractor 模型 + Tavily Provider
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        if cfg.llm.model.trim().is_empty() {
            return Err(AgentError::ConfigError("[llm].model must not be empty".to_string()));
        }
        let timeout = Duration::from_secs(cfg.llm.request_timeout_secs);
        let llm: Arc<dyn LlmClient> = Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, cfg.llm.api_key.as_deref())
                .with_params(cfg.generation_params())
                .with_request_timeout(timeout),
        );
        let extractor_llm: Arc<dyn LlmClient> = match cfg.extractor.model.as_deref() {
            Some(model) if !model.trim().is_empty() => Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), model, cfg.llm.api_key.as_deref())
                    .with_request_timeout(timeout),
            ),
            _ => llm.clone(),
        };

        let provider = TavilyProvider::new(cfg.provider.api_key.clone())
            .with_base_url(cfg.provider.base_url.clone())
            .with_timeouts(
                Duration::from_secs(cfg.provider.search_timeout_secs),
                Duration::from_secs(cfg.provider.extract_timeout_secs),
            )
            .with_max_results(cfg.provider.max_results)
            .with_depths(cfg.provider.search_depth.clone(), cfg.provider.extract_depth.clone());
        if cfg.provider.api_key.is_none() {
            tracing::warn!("TAVILY_API_KEY not configured; search and visit will report missing credentials");
        }

        Ok(Self::with_collaborators(cfg, llm, extractor_llm, Arc::new(provider)))
    }

    /// 用给定的模型与 Provider 组装（测试与自定义后端用）
    pub fn with_collaborators(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        extractor_llm: Arc<dyn LlmClient>,
        provider: Arc<dyn WebProvider>,
    ) -> Self {
        let retry = cfg.provider_retry();
        let mut registry = ToolRegistry::new();
        registry.register(SearchTool::new(provider.clone(), retry));
        registry.register(VisitTool::new(provider, retry).with_max_content_chars(cfg.provider.max_page_chars));
        let system_prompt = system_prompt_today(&registry.to_tools_block());

        let extractor = Extractor::new(extractor_llm)
            .with_retry(cfg.extractor_retry())
            .with_limits(
                cfg.extractor.min_chars,
                cfg.extractor.max_input_chars,
                cfg.extractor.fallback_chars,
            );

        Self {
            llm,
            executor: ToolExecutor::new(registry, cfg.agent.tool_timeout_secs),
            extractor,
            recovery: RecoveryEngine::new(),
            system_prompt,
            settings: cfg.loop_settings(),
            max_turns: cfg.agent.max_turns,
        }
    }

    /// 按配置的轮数与输入上限创建 Task
    pub fn task(&self, question: impl Into<String>) -> Task {
        Task::new(question)
            .with_turn_limit(self.max_turns)
            .with_token_budget(self.settings.budget.max_input_tokens)
    }

    /// 对单个 Task 跑研究循环
    pub async fn run_task(
        &self,
        task: &Task,
        cancel_token: CancellationToken,
        event_tx: Option<&mpsc::UnboundedSender<ReactEvent>>,
    ) -> TerminationResult {
        tracing::info!(question = %task.question, turn_limit = task.turn_limit, "research session started");
        let mut session = ReactSession::new(
            self.llm.as_ref(),
            &self.executor,
            &self.recovery,
            &self.system_prompt,
        )
        .with_extractor(&self.extractor)
        .with_settings(self.settings.clone())
        .with_cancel_token(cancel_token);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }
        let result = session.run(task).await;
        tracing::info!(status = %result.status, turns = result.turns, "research session finished");
        result
    }
}
