//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::{wrap_tool_response, GenerationParams, OpenAiClient, TokenUsage};
pub use traits::{CompletionStream, LlmClient, LlmError};
