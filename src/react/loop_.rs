//! 研究主循环
//!
//! GENERATING -> PARSING -> {EXECUTING_TOOLS -> GENERATING, TERMINATED}。
//! 每轮：预算检查 -> 流式生成并增量解析 -> answer 则结束；tool_call 则并发执行、经 Extractor 压缩、
//! 按调用顺序整体追加为 tool 消息；两者都没有则提示模型继续（有上限）。
//! 所有挂起点都与取消令牌和墙钟截止时间竞争，超时时在途的 future 被直接丢弃，对话不会出现半轮状态。

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{BudgetPolicy, BudgetVerdict, Conversation, Message};
use crate::react::events::preview;
use crate::react::parser::{ProtocolError, ProtocolScanner, TurnOutcome};
use crate::react::prompt::{protocol_error_feedback, CONTINUE_PROMPT, FORCE_ANSWER_PROMPT};
use crate::react::{Extractor, ReactEvent, Task, Termination, TerminationResult};
use crate::tools::{call_id_for, ToolCall, ToolExecutor, ToolResult};

/// 循环的可调参数（默认值见 config/default.toml 的 [agent] / [llm] 段）
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// 单轮生成的最大尝试次数（含第一次）
    pub max_generation_attempts: usize,
    pub generation_backoff: Duration,
    /// 连续无标记输出时最多提示几次
    pub max_plain_nudges: usize,
    /// 整个会话的墙钟上限；None 表示只受轮数限制
    pub max_wall_clock: Option<Duration>,
    pub budget: BudgetPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_generation_attempts: 10,
            generation_backoff: Duration::from_secs(1),
            max_plain_nudges: 2,
            max_wall_clock: Some(Duration::from_secs(150 * 60)),
            budget: BudgetPolicy::default(),
        }
    }
}

/// 一次生成的产物：写入对话的文本与解析结论
#[derive(Debug)]
struct Generation {
    text: String,
    outcome: TurnOutcome,
}

/// 挂起点与取消 / 截止时间竞争的结果
enum Guarded<T> {
    Done(T),
    Cancelled,
    Deadline,
}

/// 研究会话：持有一次 run 所需的全部协作者（均为借用，可在多个 Task 之间复用）
pub struct ReactSession<'a> {
    llm: &'a dyn LlmClient,
    executor: &'a ToolExecutor,
    recovery: &'a RecoveryEngine,
    system_prompt: &'a str,
    extractor: Option<&'a Extractor>,
    settings: LoopSettings,
    cancel_token: CancellationToken,
    event_tx: Option<&'a tokio::sync::mpsc::UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        system_prompt: &'a str,
    ) -> Self {
        Self {
            llm,
            executor,
            recovery,
            system_prompt,
            extractor: None,
            settings: LoopSettings::default(),
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// 设置 Extractor；不设置时 tool 结果只按单条上限截断后写入
    pub fn with_extractor(mut self, extractor: &'a Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a tokio::sync::mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 运行一个研究任务直到终止；从不返回错误，所有失败都体现在 TerminationResult.status
    pub async fn run(&self, task: &Task) -> TerminationResult {
        let budget = BudgetPolicy {
            max_input_tokens: task.token_budget,
            ..self.settings.budget.clone()
        };
        let deadline = self.settings.max_wall_clock.map(|d| Instant::now() + d);

        let mut conv = Conversation::new();
        conv.push(Message::system(self.system_prompt));
        conv.push(Message::user(task.question.as_str()));

        let mut turns = 0;
        let mut nudges = 0;
        loop {
            if turns >= task.turn_limit {
                tracing::warn!(turns, "turn limit reached without an answer");
                return finish(
                    Termination::TurnLimitExceeded,
                    None,
                    conv,
                    turns,
                    Some(format!("no answer within {} turns", task.turn_limit)),
                );
            }

            match budget.enforce(&mut conv) {
                BudgetVerdict::WithinBudget => {}
                BudgetVerdict::Compressed(compressed) => self.emit(ReactEvent::Compression {
                    compressed,
                    estimated_tokens: conv.estimated_tokens(),
                }),
                BudgetVerdict::Exhausted => {
                    return self
                        .force_answer(conv, turns, deadline, &budget, "context exceeds the input budget")
                        .await;
                }
            }

            turns += 1;
            tracing::info!(turn = turns, messages = conv.len(), "generating");
            self.emit(ReactEvent::TurnStarted {
                turn: turns,
                max_turns: task.turn_limit,
            });

            let generation = match self.guard(deadline, self.generate(&mut conv, &budget)).await {
                Guarded::Done(Ok(g)) => g,
                // 本轮没有产出任何消息，强制作答占用这一轮
                Guarded::Done(Err(AgentError::BudgetExhausted(detail))) => {
                    return self.force_answer(conv, turns - 1, deadline, &budget, &detail).await;
                }
                Guarded::Done(Err(e)) => {
                    self.emit(ReactEvent::Error { text: e.to_string() });
                    return finish(Termination::FatalError, None, conv, turns, Some(e.to_string()));
                }
                Guarded::Deadline => return self.deadline_reached(conv, turns),
                Guarded::Cancelled => return self.cancelled(conv, turns),
            };

            conv.push(Message::assistant(generation.text.as_str()));
            match generation.outcome {
                TurnOutcome::Answer(answer) => {
                    tracing::info!(turn = turns, "answer found");
                    self.emit(ReactEvent::Answer { text: answer.clone() });
                    return finish(Termination::AnswerFound, Some(answer), conv, turns, None);
                }
                TurnOutcome::Plain => {
                    if nudges >= self.settings.max_plain_nudges {
                        tracing::warn!(turn = turns, nudges, "model keeps replying without markers");
                        return finish(
                            Termination::FatalError,
                            Some(generation.text),
                            conv,
                            turns,
                            Some("completion contained neither a tool call nor an answer".to_string()),
                        );
                    }
                    nudges += 1;
                    conv.push(Message::user(CONTINUE_PROMPT));
                }
                TurnOutcome::ToolCalls(slots) => {
                    nudges = 0;
                    match self.guard(deadline, self.dispatch_turn(task, turns, slots, &budget)).await {
                        // 整轮结果一次性追加
                        Guarded::Done(messages) => conv.extend(messages),
                        Guarded::Deadline => return self.deadline_reached(conv, turns),
                        Guarded::Cancelled => return self.cancelled(conv, turns),
                    }
                }
            }
        }
    }

    /// 压缩后仍超出输入上限：要求模型停止调用工具直接作答，只再生成一次
    async fn force_answer(
        &self,
        mut conv: Conversation,
        turns: usize,
        deadline: Option<Instant>,
        budget: &BudgetPolicy,
        detail: &str,
    ) -> TerminationResult {
        tracing::warn!(estimated_tokens = conv.estimated_tokens(), detail, "token budget exhausted, forcing an answer");
        self.emit(ReactEvent::Recovery {
            action: "force_answer".to_string(),
            detail: detail.to_string(),
        });
        conv.push(Message::user(FORCE_ANSWER_PROMPT));
        let turns = turns + 1;
        let generation = match self.guard(deadline, self.generate(&mut conv, budget)).await {
            Guarded::Done(Ok(g)) => g,
            Guarded::Done(Err(e)) => {
                return finish(
                    Termination::TurnLimitExceeded,
                    None,
                    conv,
                    turns,
                    Some(format!("token budget exhausted; final generation failed: {e}")),
                );
            }
            Guarded::Deadline => return self.deadline_reached(conv, turns),
            Guarded::Cancelled => return self.cancelled(conv, turns),
        };
        conv.push(Message::assistant(generation.text.as_str()));
        match generation.outcome {
            TurnOutcome::Answer(answer) => {
                self.emit(ReactEvent::Answer { text: answer.clone() });
                finish(Termination::AnswerFound, Some(answer), conv, turns, None)
            }
            _ => finish(
                Termination::TurnLimitExceeded,
                None,
                conv,
                turns,
                Some("token budget exhausted without an answer".to_string()),
            ),
        }
    }

    fn deadline_reached(&self, conv: Conversation, turns: usize) -> TerminationResult {
        tracing::warn!(turns, "wall-clock ceiling reached");
        self.emit(ReactEvent::Error {
            text: "wall-clock ceiling reached".to_string(),
        });
        finish(
            Termination::TurnLimitExceeded,
            None,
            conv,
            turns,
            Some("wall-clock ceiling reached".to_string()),
        )
    }

    fn cancelled(&self, conv: Conversation, turns: usize) -> TerminationResult {
        self.emit(ReactEvent::Error {
            text: AgentError::Cancelled.to_string(),
        });
        finish(
            Termination::FatalError,
            None,
            conv,
            turns,
            Some(AgentError::Cancelled.to_string()),
        )
    }

    async fn guard<F: Future>(&self, deadline: Option<Instant>, fut: F) -> Guarded<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Guarded::Cancelled,
            _ = wait_until(deadline) => Guarded::Deadline,
            out = fut => Guarded::Done(out),
        }
    }

    /// 一轮生成，失败时由 RecoveryEngine 决定重试、压缩上下文或放弃
    async fn generate(&self, conv: &mut Conversation, budget: &BudgetPolicy) -> Result<Generation, AgentError> {
        let max_attempts = self.settings.max_generation_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.stream_once(conv.messages()).await {
                Ok(g) => return Ok(g),
                Err(e) => AgentError::from(e),
            };
            let action = self.recovery.handle(&err, attempt, max_attempts);
            tracing::warn!(attempt, error = %err, action = ?action, "generation failed");
            match action {
                RecoveryAction::RetryGeneration => {
                    self.emit(ReactEvent::Recovery {
                        action: "retry_generation".to_string(),
                        detail: err.to_string(),
                    });
                    if !self.settings.generation_backoff.is_zero() {
                        sleep(self.settings.generation_backoff * attempt as u32).await;
                    }
                }
                RecoveryAction::CompressContext => {
                    let compressed = conv.compress_tool_messages(0, budget.compressed_tool_chars);
                    self.emit(ReactEvent::Recovery {
                        action: "compress_context".to_string(),
                        detail: format!("compressed {compressed} tool messages"),
                    });
                    if compressed == 0 {
                        return Err(exhausted_if_oversized(err));
                    }
                }
                RecoveryAction::Abort => return Err(exhausted_if_oversized(err)),
            }
            attempt += 1;
        }
    }

    /// 流式读取一次完成，边读边扫描；遇到模型臆造的 `<tool_response>` 即停止读取
    async fn stream_once(&self, messages: &[Message]) -> Result<Generation, LlmError> {
        let mut stream = self.llm.complete_stream(messages).await?;
        let mut scanner = ProtocolScanner::new();
        let mut events = Vec::new();
        while let Some(chunk) = stream.next().await {
            events.extend(scanner.feed(&chunk?));
            if scanner.is_stopped() {
                break;
            }
        }
        events.extend(scanner.finish());

        let text = scanner.transcript().to_string();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(Generation {
            text,
            outcome: TurnOutcome::from_events(events),
        })
    }

    /// 执行一轮的全部 tool_call：合法调用并发执行，解析失败的区域就地变成错误结果；
    /// 然后逐条经 Extractor 压缩（也并发），按调用出现顺序返回 tool 消息
    async fn dispatch_turn(
        &self,
        task: &Task,
        turn: usize,
        slots: Vec<Result<ToolCall, ProtocolError>>,
        budget: &BudgetPolicy,
    ) -> Vec<Message> {
        let slots: Vec<(String, Result<ToolCall, ProtocolError>)> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                let id = call_id_for(turn, i + 1);
                (id.clone(), slot.map(|call| call.with_call_id(id)))
            })
            .collect();
        let calls: Vec<ToolCall> = slots
            .iter()
            .filter_map(|(_, s)| s.as_ref().ok().cloned())
            .collect();
        for call in &calls {
            self.emit(ReactEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool: call.name.clone(),
                args: call.arguments.clone(),
            });
        }

        let mut executed = self.executor.execute_batch(&calls).await.into_iter();
        let results: Vec<ToolResult> = slots
            .into_iter()
            .map(|(id, slot)| match slot {
                Ok(call) => executed.next().unwrap_or_else(|| {
                    ToolResult::error(id, &call.name, "[Tool Error]: no result was produced.")
                }),
                Err(e) => {
                    let name = match &e {
                        ProtocolError::InvalidArguments { name, .. } => name.clone(),
                        _ => "tool_call".to_string(),
                    };
                    ToolResult::error(id, name, protocol_error_feedback(&e))
                }
            })
            .collect();

        for r in results.iter().filter(|r| !r.is_ok()) {
            self.emit(ReactEvent::ToolFailure {
                tool: r.name.clone(),
                reason: preview(&r.content),
            });
        }

        join_all(results.iter().map(|r| self.fold(task, r, budget))).await
    }

    /// 单个结果 -> tool 消息：成功结果经 Extractor 按目标压缩，错误 sentinel 原样保留
    async fn fold(&self, task: &Task, result: &ToolResult, budget: &BudgetPolicy) -> Message {
        let content = match self.extractor {
            Some(extractor) if result.is_ok() && extractor.should_compress(&result.content) => {
                let goal = result.goal.as_deref().unwrap_or(task.question.as_str());
                extractor.distill(&result.content, goal, &result.name).await
            }
            _ => result.content.clone(),
        };
        let content = budget.bound_message(content);
        self.emit(ReactEvent::Observation {
            call_id: result.call_id.clone(),
            tool: result.name.clone(),
            preview: preview(&content),
        });
        Message::tool(result.call_id.as_str(), content)
    }
}

/// 上下文超长且已无法再压缩：按预算耗尽处理，而不是致命错误
fn exhausted_if_oversized(err: AgentError) -> AgentError {
    match err {
        AgentError::LlmError(LlmError::ContextLength(msg)) => AgentError::BudgetExhausted(msg),
        other => other,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn finish(
    status: Termination,
    prediction: Option<String>,
    conv: Conversation,
    turns: usize,
    reason: Option<String>,
) -> TerminationResult {
    TerminationResult {
        status,
        prediction,
        messages: conv.into_messages(),
        turns,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{Role, COMPRESSED_MARKER};
    use crate::tools::{MockWebProvider, ProviderError, SearchHit, SearchResponse, SearchTool, ToolRegistry, VisitTool};
    use crate::core::RetryPolicy;
    use std::sync::Arc;

    fn executor(provider: MockWebProvider) -> ToolExecutor {
        let provider = Arc::new(provider);
        let mut registry = ToolRegistry::new();
        registry.register(SearchTool::new(provider.clone(), RetryPolicy::immediate(3)));
        registry.register(VisitTool::new(provider, RetryPolicy::immediate(3)));
        ToolExecutor::new(registry, 30)
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            max_generation_attempts: 3,
            generation_backoff: Duration::ZERO,
            max_plain_nudges: 2,
            max_wall_clock: None,
            budget: BudgetPolicy::default(),
        }
    }

    fn provider() -> MockWebProvider {
        MockWebProvider::new().with_search(
            "rust",
            SearchResponse {
                answer: None,
                results: vec![SearchHit {
                    title: "Rust".into(),
                    url: "https://www.rust-lang.org".into(),
                    content: "A language empowering everyone.".into(),
                }],
            },
        )
    }

    const SEARCH_CALL: &str = r#"<tool_call>{"name": "search", "arguments": {"query": ["rust"]}}</tool_call>"#;

    #[tokio::test]
    async fn test_answer_on_first_turn() {
        let llm = ScriptedLlmClient::new(["<think>easy</think><answer>42</answer>"]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(result.prediction.as_deref(), Some("42"));
        assert_eq!(result.turns, 1);
        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_tool_results_follow_their_call() {
        let llm = ScriptedLlmClient::new([SEARCH_CALL.to_string(), "<answer>done</answer>".to_string()]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("what is rust")).await;

        assert_eq!(result.status, Termination::AnswerFound);
        let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(result.messages[3].content.contains("[Rust](https://www.rust-lang.org)"));
        // 第二次生成时已能看到 tool 结果
        assert_eq!(llm.requests()[1].len(), 4);
    }

    #[tokio::test]
    async fn test_plain_nudges_then_fatal() {
        let llm = ScriptedLlmClient::new(["hmm", "still thinking", "no idea"]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::FatalError);
        assert_eq!(result.prediction.as_deref(), Some("no idea"));
        assert_eq!(llm.calls(), 3);
        let nudges = result
            .messages
            .iter()
            .filter(|m| m.content == CONTINUE_PROMPT)
            .count();
        assert_eq!(nudges, 2);
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let llm = ScriptedLlmClient::new(vec![SEARCH_CALL; 5]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q").with_turn_limit(2)).await;
        assert_eq!(result.status, Termination::TurnLimitExceeded);
        assert_eq!(result.prediction, None);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_generation_error_retried() {
        let llm = ScriptedLlmClient::with_results([
            Err(LlmError::Timeout),
            Ok("<answer>ok</answer>".to_string()),
        ]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(llm.calls(), 2);
        assert_eq!(result.turns, 1);
    }

    #[tokio::test]
    async fn test_terminal_generation_error_is_fatal() {
        let llm = ScriptedLlmClient::with_results([Err(LlmError::Api("bad model".into()))]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::FatalError);
        assert!(result.reason.unwrap().contains("bad model"));
    }

    #[tokio::test]
    async fn test_empty_completion_retried() {
        let llm = ScriptedLlmClient::new(["   ", "<answer>x</answer>"]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_hallucinated_tool_response_is_dropped() {
        let reply = format!("{SEARCH_CALL}\n<tool_response>\nfake results\n</tool_response>\n<answer>fake</answer>");
        let llm = ScriptedLlmClient::new([reply, "<answer>real</answer>".to_string()]).with_chunk_chars(7);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.prediction.as_deref(), Some("real"));
        assert!(!result.messages[2].content.contains("fake"));
        assert_eq!(result.messages[3].role, Role::Tool);
    }

    #[tokio::test]
    async fn test_mixed_valid_and_malformed_calls_keep_order() {
        let reply = format!("<tool_call>{{not json}}</tool_call>{SEARCH_CALL}");
        let llm = ScriptedLlmClient::new([reply, "<answer>a</answer>".to_string()]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::AnswerFound);
        assert!(result.messages[3].content.starts_with("[Tool Error]: Could not parse tool call"));
        assert!(result.messages[4].content.contains("A search for 'rust' found 1 results"));
        // id 按 (轮次, 区域序号) 分配，解析失败的区域也占一个序号
        assert_eq!(result.messages[3].tool_call_id.as_deref(), Some("call_1_1"));
        assert_eq!(result.messages[4].tool_call_id.as_deref(), Some("call_1_2"));
    }

    #[tokio::test]
    async fn test_cancelled_before_generation() {
        let llm = ScriptedLlmClient::new(["<answer>x</answer>"]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys")
            .with_settings(settings())
            .with_cancel_token(token);
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::FatalError);
        assert_eq!(result.reason.as_deref(), Some("Cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_ceiling_abandons_slow_tools() {
        // 每次搜索都超时，重试退避把会话拖过墙钟上限
        let provider = MockWebProvider::new().fail_first(100, ProviderError::Timeout);
        let provider = Arc::new(provider);
        let mut registry = ToolRegistry::new();
        registry.register(SearchTool::new(provider, RetryPolicy::new(100, Duration::from_secs(5))));
        let exec = ToolExecutor::new(registry, 10_000);

        let llm = ScriptedLlmClient::new([SEARCH_CALL]);
        let recovery = RecoveryEngine::new();
        let mut s = settings();
        s.max_wall_clock = Some(Duration::from_secs(60));
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(s);
        let result = session.run(&Task::new("q")).await;
        assert_eq!(result.status, Termination::TurnLimitExceeded);
        // 半轮结果不写入：只有 system / user / assistant
        assert_eq!(result.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_forces_answer() {
        let llm = ScriptedLlmClient::new(["<answer>best guess</answer>"]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(settings());
        let question = "x".repeat(4_000);
        let result = session.run(&Task::new(question).with_token_budget(100)).await;
        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(result.prediction.as_deref(), Some("best guess"));
        let last_request = &llm.requests()[0];
        assert_eq!(last_request.last().map(|m| m.content.as_str()), Some(FORCE_ANSWER_PROMPT));
    }

    fn long_page_provider() -> MockWebProvider {
        MockWebProvider::new().with_search(
            "rust",
            SearchResponse {
                answer: None,
                results: vec![SearchHit {
                    title: "Rust".into(),
                    url: "https://www.rust-lang.org".into(),
                    content: "a".repeat(5_000),
                }],
            },
        )
    }

    fn context_length() -> LlmError {
        LlmError::ContextLength("maximum context length exceeded".into())
    }

    #[tokio::test]
    async fn test_context_length_error_compresses_and_retries() {
        let llm = ScriptedLlmClient::with_results([
            Ok(SEARCH_CALL.to_string()),
            Err(context_length()),
            Ok("<answer>compact</answer>".to_string()),
        ]);
        let exec = executor(long_page_provider());
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys")
            .with_settings(settings())
            .with_event_tx(&tx);
        let result = session.run(&Task::new("q")).await;
        drop(tx);

        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(result.turns, 2);
        assert!(result.messages[3].content.ends_with(COMPRESSED_MARKER));
        // 重试的请求里已是压缩后的 tool 消息
        assert!(llm.requests()[2][3].content.ends_with(COMPRESSED_MARKER));
        let mut saw_compress = false;
        while let Some(ev) = rx.recv().await {
            if let ReactEvent::Recovery { action, .. } = ev {
                saw_compress |= action == "compress_context";
            }
        }
        assert!(saw_compress);
    }

    #[tokio::test]
    async fn test_context_length_with_nothing_to_compress_forces_answer() {
        let mut s = settings();
        s.max_generation_attempts = 10;
        let llm = ScriptedLlmClient::with_results([
            Ok(SEARCH_CALL.to_string()),
            Err(context_length()),
            Ok("<answer>from what I have</answer>".to_string()),
        ]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(s);
        let result = session.run(&Task::new("q")).await;

        assert_eq!(result.status, Termination::AnswerFound);
        assert_eq!(result.prediction.as_deref(), Some("from what I have"));
        assert_eq!(result.turns, 2);
        let last_request = &llm.requests()[2];
        assert_eq!(last_request.last().map(|m| m.content.as_str()), Some(FORCE_ANSWER_PROMPT));
    }

    #[tokio::test]
    async fn test_context_length_during_forced_answer_ends_at_limit() {
        let mut s = settings();
        s.max_generation_attempts = 10;
        let llm = ScriptedLlmClient::with_results([
            Ok(SEARCH_CALL.to_string()),
            Err(context_length()),
            Err(context_length()),
        ]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys").with_settings(s);
        let result = session.run(&Task::new("q")).await;

        assert_eq!(result.status, Termination::TurnLimitExceeded);
        assert_eq!(result.prediction, None);
        assert!(result.reason.unwrap().contains("token budget exhausted"));
    }

    #[tokio::test]
    async fn test_budget_compression_emits_event() {
        let mut s = settings();
        s.budget.keep_recent_tool_messages = 0;
        let llm = ScriptedLlmClient::new([SEARCH_CALL.to_string(), "<answer>done</answer>".to_string()]);
        let exec = executor(long_page_provider());
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys")
            .with_settings(s)
            .with_event_tx(&tx);
        let result = session.run(&Task::new("q").with_token_budget(1_000)).await;
        drop(tx);

        assert_eq!(result.status, Termination::AnswerFound);
        assert!(result.messages[3].content.ends_with(COMPRESSED_MARKER));
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let ReactEvent::Compression { compressed, .. } = &ev {
                assert_eq!(*compressed, 1);
            }
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(
            kinds,
            vec!["turn_started", "tool_call", "observation", "compression", "turn_started", "answer"]
        );
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let llm = ScriptedLlmClient::new([SEARCH_CALL.to_string(), "<answer>done</answer>".to_string()]);
        let exec = executor(provider());
        let recovery = RecoveryEngine::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&llm, &exec, &recovery, "sys")
            .with_settings(settings())
            .with_event_tx(&tx);
        session.run(&Task::new("q")).await;
        drop(tx);
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(
            kinds,
            vec!["turn_started", "tool_call", "observation", "turn_started", "answer"]
        );
    }
}
