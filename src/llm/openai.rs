//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），OpenRouter、vLLM 等均可。
//! tool 消息以 `<tool_response>` 包裹后作为 user 消息发送（文本协议，不使用原生 function calling）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, StopConfiguration,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.95,
            presence_penalty: 1.1,
        }
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与采样参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    params: GenerationParams,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            params: GenerationParams::default(),
            request_timeout: Duration::from_secs(600),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                    Role::Tool => ChatCompletionRequestUserMessageArgs::default()
                        .content(wrap_tool_response(&m.content))
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                };
                built.map_err(|e| LlmError::Api(e.to_string()))
            })
            .collect()
    }
}

/// 模型开始臆造工具结果时由服务端截停，省去无用的生成
pub const STOP_SEQUENCES: [&str; 2] = ["\n<tool_response>", "<tool_response>"];

fn stop_sequences() -> StopConfiguration {
    StopConfiguration::StringArray(STOP_SEQUENCES.iter().map(|s| s.to_string()).collect())
}

/// tool 消息在文本协议中的外层包裹
pub fn wrap_tool_response(content: &str) -> String {
    format!("<tool_response>\n{}\n</tool_response>", content)
}

/// 按错误文本归类：限流 / 上下文超长 / 超时 / 连接失败 / 其它
fn classify_error(msg: String) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        LlmError::RateLimited
    } else if lower.contains("context length")
        || lower.contains("context_length")
        || lower.contains("maximum context")
    {
        LlmError::ContextLength(msg)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout
    } else if lower.contains("connection") || lower.contains("error sending request") {
        LlmError::Transport(msg)
    } else {
        LlmError::Api(msg)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.params.temperature)
            .top_p(self.params.top_p)
            .presence_penalty(self.params.presence_penalty)
            .stop(stop_sequences())
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| classify_error(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert_eq!(classify_error("Rate limit reached".into()), LlmError::RateLimited);
        assert!(matches!(
            classify_error("This model's maximum context length is 8192 tokens".into()),
            LlmError::ContextLength(_)
        ));
        assert_eq!(classify_error("operation timed out".into()), LlmError::Timeout);
        assert!(matches!(classify_error("invalid api key".into()), LlmError::Api(_)));
    }

    #[test]
    fn test_wrap_tool_response() {
        assert_eq!(
            wrap_tool_response("result"),
            "<tool_response>\nresult\n</tool_response>"
        );
    }

    #[test]
    fn test_stop_sequences_cover_tool_response() {
        match stop_sequences() {
            StopConfiguration::StringArray(seqs) => {
                assert!(seqs.iter().all(|s| s.ends_with("<tool_response>")));
                assert_eq!(seqs.len(), 2);
            }
            other => panic!("expected a list of stop sequences, got {other:?}"),
        }
    }

    #[test]
    fn test_request_carries_stop_sequences() {
        let request = CreateChatCompletionRequestArgs::default()
            .model("m")
            .messages(Vec::<ChatCompletionRequestMessage>::new())
            .stop(stop_sequences())
            .build()
            .unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stop"][0], "\n<tool_response>");
        assert_eq!(json["stop"][1], "<tool_response>");
    }

    #[test]
    fn test_tool_role_becomes_user_message() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "m", Some("k"));
        let msgs = client
            .to_openai_messages(&[Message::system("s"), Message::tool("c1", "r")])
            .unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[1], ChatCompletionRequestMessage::User(_)));
    }
}
