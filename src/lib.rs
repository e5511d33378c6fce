//! bee-research - Rust 深度研究智能体
//!
//! 模块划分：
//! - **agent**: 按配置组装组件，运行单个研究任务
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复引擎、通用重试策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话历史与 token 预算
//! - **observability**: 日志初始化
//! - **react**: 协议解析、提示词、Extractor、研究主循环
//! - **tools**: Provider（Tavily / Mock）、search / visit 工具、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
