//! 工具箱：Provider 抽象、强类型参数、注册表与执行器、search / visit 两个工具

pub mod args;
pub mod call;
pub mod executor;
pub mod mock;
pub mod provider;
pub mod registry;
pub mod search;
pub mod tavily;
pub mod visit;

pub use args::{parameters_schema, ArgsError, SearchArgs, ToolArgs, VisitArgs};
pub use call::{call_id_for, ToolCall, ToolResult, ToolStatus};
pub use executor::ToolExecutor;
pub use mock::MockWebProvider;
pub use provider::{
    ExtractResponse, ExtractedPage, FailedExtraction, ProviderError, SearchHit, SearchResponse,
    WebProvider,
};
pub use registry::{Tool, ToolRegistry};
pub use search::SearchTool;
pub use tavily::TavilyProvider;
pub use visit::VisitTool;
