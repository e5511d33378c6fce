//! 认知层：协议解析、提示词、Extractor、研究主循环

pub mod events;
pub mod extractor;
pub mod loop_;
pub mod parser;
pub mod prompt;
pub mod task;

pub use events::ReactEvent;
pub use extractor::{ExtractError, ExtractedNote, Extractor};
pub use loop_::{LoopSettings, ReactSession};
pub use parser::{parse_completion, ProtocolError, ProtocolScanner, ScanEvent, TurnOutcome};
pub use task::{SessionRecord, Task, Termination, TerminationResult};
