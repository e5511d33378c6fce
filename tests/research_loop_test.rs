//! 研究循环集成测试：脚本化 LLM + Mock Provider 驱动完整会话

use std::sync::Arc;

use bee_research::agent::AgentComponents;
use bee_research::config::AppConfig;
use bee_research::llm::{LlmClient, ScriptedLlmClient};
use bee_research::memory::Role;
use bee_research::react::{SessionRecord, Task, Termination};
use bee_research::tools::{
    ExtractResponse, ExtractedPage, FailedExtraction, MockWebProvider, ProviderError, SearchHit,
    SearchResponse,
};
use tokio_util::sync::CancellationToken;

const NOTE: &str = r#"{"rational": "the page states it", "evidence": "Paris is the capital of France.", "summary": "Paris."}"#;

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.provider.retry_backoff_ms = 0;
    cfg.llm.retry_backoff_ms = 0;
    cfg.llm.max_retries = 2;
    cfg.agent.max_wall_clock_secs = 0;
    cfg
}

fn france() -> SearchResponse {
    SearchResponse {
        answer: Some("Paris".into()),
        results: vec![SearchHit {
            title: "France".into(),
            url: "https://en.wikipedia.org/wiki/France".into(),
            content: "France's capital is Paris.".into(),
        }],
    }
}

struct Harness {
    agent: AgentComponents,
    llm: Arc<ScriptedLlmClient>,
    extractor_llm: Arc<ScriptedLlmClient>,
    provider: Arc<MockWebProvider>,
}

fn harness(cfg: &AppConfig, replies: Vec<String>, notes: Vec<String>, provider: MockWebProvider) -> Harness {
    let llm = Arc::new(ScriptedLlmClient::new(replies));
    let extractor_llm = Arc::new(ScriptedLlmClient::new(notes));
    let provider = Arc::new(provider);
    let agent = AgentComponents::with_collaborators(
        cfg,
        llm.clone() as Arc<dyn LlmClient>,
        extractor_llm.clone() as Arc<dyn LlmClient>,
        provider.clone(),
    );
    Harness {
        agent,
        llm,
        extractor_llm,
        provider,
    }
}

fn search_call(query: &str) -> String {
    format!(r#"<think>look it up</think><tool_call>{{"name": "search", "arguments": {{"query": ["{query}"]}}}}</tool_call>"#)
}

#[tokio::test]
async fn test_answer_on_third_turn_stops_generation() {
    let cfg = test_config();
    let h = harness(
        &cfg,
        vec![
            search_call("capital of France"),
            r#"<tool_call>{"name": "visit", "arguments": {"url": "https://en.wikipedia.org/wiki/France", "goal": "find the capital"}}</tool_call>"#.to_string(),
            "<think>confirmed</think><answer>42</answer>".to_string(),
            "<answer>never requested</answer>".to_string(),
        ],
        vec![NOTE.to_string(), NOTE.to_string()],
        MockWebProvider::new()
            .with_search("capital of France", france())
            .with_extract(ExtractResponse {
                results: vec![ExtractedPage {
                    url: "https://en.wikipedia.org/wiki/France".into(),
                    raw_content: "France ... Paris is the capital of France ...".into(),
                }],
                failed_results: vec![],
            }),
    );

    let task = h.agent.task("What is the capital of France?");
    let result = h.agent.run_task(&task, CancellationToken::new(), None).await;

    assert_eq!(result.status, Termination::AnswerFound);
    assert_eq!(result.prediction.as_deref(), Some("42"));
    assert_eq!(result.turns, 3);
    assert_eq!(h.llm.calls(), 3);
    // system, user, (assistant, tool) x 2, assistant
    assert_eq!(result.messages.len(), 7);
    assert_eq!(result.messages[3].role, Role::Tool);
    assert!(result.messages[5].content.contains("user goal \"find the capital\""));
    // search 结果以问题为目标压缩
    let first_extraction = &h.extractor_llm.requests()[0][0].content;
    assert!(first_extraction.contains("What is the capital of France?"));
    assert_eq!(h.provider.extract_calls(), 1);
}

#[tokio::test]
async fn test_search_timeouts_reported_and_loop_continues() {
    let cfg = test_config();
    let h = harness(
        &cfg,
        vec![search_call("slow"), "<answer>unknown</answer>".to_string()],
        vec![],
        MockWebProvider::new().with_search_error("slow", ProviderError::Timeout),
    );

    let result = h
        .agent
        .run_task(&Task::new("q"), CancellationToken::new(), None)
        .await;

    assert_eq!(result.status, Termination::AnswerFound);
    assert_eq!(h.provider.search_calls(), 3);
    assert_eq!(
        result.messages[3].content,
        "[Search Error]: Timeout while searching for 'slow'. Please try again."
    );
    // 错误结果不经过 Extractor
    assert_eq!(h.extractor_llm.calls(), 0);
}

#[tokio::test]
async fn test_malformed_tool_calls_never_abort_the_session() {
    let payloads = [
        "<tool_call>{\"name\": \"search\", \"arguments\": </tool_call>",
        "<tool_call>[1, 2, 3]</tool_call>",
        "<tool_call>{\"arguments\": {}}</tool_call>",
        "<tool_call>{\"name\": \"search\", \"arguments\": {\"query\": []}}</tool_call>",
        "<tool_call>{\"name\": \"visit\", \"arguments\": {\"url\": \"https://a.example\"}}</tool_call>",
        "<tool_call>{\"name\": \"browse\", \"arguments\": {}}</tool_call>",
        "<tool_call>{\"name\": \"search\"",
    ];
    for payload in payloads {
        let cfg = test_config();
        let h = harness(
            &cfg,
            vec![payload.to_string(), "<answer>recovered</answer>".to_string()],
            vec![],
            MockWebProvider::new(),
        );
        let result = h
            .agent
            .run_task(&Task::new("q"), CancellationToken::new(), None)
            .await;

        assert_eq!(result.status, Termination::AnswerFound, "payload: {payload}");
        let tool_msg = &result.messages[3];
        assert_eq!(tool_msg.role, Role::Tool, "payload: {payload}");
        assert!(tool_msg.content.starts_with("[Tool Error]"), "payload: {payload}");
        assert_eq!(h.provider.search_calls() + h.provider.extract_calls(), 0);
    }
}

#[tokio::test]
async fn test_parallel_calls_fold_in_call_order() {
    let cfg = test_config();
    let reply = concat!(
        r#"<tool_call>{"name": "visit", "arguments": {"url": "ftp://example.com", "goal": "x"}}</tool_call>"#,
        r#"<tool_call>{"name": "search", "arguments": {"query": "capital of France"}}</tool_call>"#,
        r#"<tool_call>{"name": "visit", "arguments": {"url": ["https://gone.example"], "goal": "y"}}</tool_call>"#,
    );
    let h = harness(
        &cfg,
        vec![reply.to_string(), "<answer>Paris</answer>".to_string()],
        vec![NOTE.to_string()],
        MockWebProvider::new()
            .with_search("capital of France", france())
            .with_extract(ExtractResponse {
                results: vec![],
                failed_results: vec![FailedExtraction {
                    url: "https://gone.example".into(),
                    error: Some("404".into()),
                }],
            }),
    );

    let result = h
        .agent
        .run_task(&Task::new("capital?"), CancellationToken::new(), None)
        .await;

    let tools: Vec<&str> = result
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tools.len(), 3);
    assert!(tools[0].starts_with("[Visit] Error: No valid URLs provided"));
    assert!(tools[1].contains("Summary:\nParis."));
    assert_eq!(tools[2], "[Visit Error]: Failed to extract content from: https://gone.example");
    // ftp 地址不会触达 Provider
    assert_eq!(h.provider.extracted_urls(), vec![vec!["https://gone.example".to_string()]]);
}

#[tokio::test]
async fn test_extractor_failure_falls_back_to_truncated_content() {
    let mut cfg = test_config();
    cfg.extractor.fallback_chars = 40;
    cfg.extractor.max_attempts = 1;
    let h = harness(
        &cfg,
        vec![search_call("capital of France"), "<answer>Paris</answer>".to_string()],
        vec!["not json at all".to_string()],
        MockWebProvider::new().with_search("capital of France", france()),
    );

    let result = h
        .agent
        .run_task(&Task::new("capital?"), CancellationToken::new(), None)
        .await;

    assert_eq!(result.status, Termination::AnswerFound);
    let tool_msg = &result.messages[3].content;
    assert!(tool_msg.starts_with("A search for 'capital of France'"));
    assert!(tool_msg.ends_with("[content truncated: extraction unavailable]"));
}

#[tokio::test]
async fn test_missing_credentials_reported_to_model() {
    let cfg = test_config();
    let h = harness(
        &cfg,
        vec![search_call("anything"), "<answer>from memory</answer>".to_string()],
        vec![],
        MockWebProvider::new().without_credentials(),
    );

    let result = h
        .agent
        .run_task(&Task::new("q"), CancellationToken::new(), None)
        .await;

    assert_eq!(result.status, Termination::AnswerFound);
    assert_eq!(
        result.messages[3].content,
        "[Search Error]: TAVILY_API_KEY environment variable not set."
    );
}

#[tokio::test]
async fn test_turn_limit_produces_record_without_prediction() {
    let cfg = test_config();
    let h = harness(
        &cfg,
        vec![search_call("a"), search_call("b"), search_call("c")],
        vec![],
        MockWebProvider::new(),
    );
    let task = Task::new("q").with_turn_limit(2).with_ground_truth("x");
    let result = h.agent.run_task(&task, CancellationToken::new(), None).await;
    assert_eq!(result.status, Termination::TurnLimitExceeded);
    assert_eq!(h.llm.calls(), 2);

    let record = SessionRecord::new(&task, result);
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["termination"], "turn_limit_exceeded");
    assert_eq!(json["prediction"], "");
    assert_eq!(json["answer"], "x");
}

#[tokio::test]
async fn test_identical_sessions_produce_identical_records() {
    let run = || async {
        let cfg = test_config();
        let h = harness(
            &cfg,
            vec![search_call("capital of France"), "<answer>Paris</answer>".to_string()],
            vec![NOTE.to_string()],
            MockWebProvider::new().with_search("capital of France", france()),
        );
        let task = Task::new("capital?").with_ground_truth("Paris");
        let result = h.agent.run_task(&task, CancellationToken::new(), None).await;
        serde_json::to_string(&SessionRecord::new(&task, result)).unwrap()
    };
    let (first, second) = (run().await, run().await);
    assert_eq!(first, second);
    assert!(first.contains(r#""tool_call_id":"call_1_1""#));
}
