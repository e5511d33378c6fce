//! 模型输出协议解析
//!
//! 增量扫描器：逐片段消费模型输出，识别 `<tool_call>…</tool_call>` 与 `<answer>…</answer>`，
//! 产出 PlainText / ToolCallFound / AnswerFound 事件。模型输出是不可信文本：
//! 单个 tool_call 区域解析失败只产生该区域的 ProtocolError，不影响兄弟区域，也不会中止会话。
//! 模型自己写出的 `<tool_response>` 之后的内容一律丢弃（那是它在臆造工具结果）。

use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolCall;

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";
pub const ANSWER_OPEN: &str = "<answer>";
pub const ANSWER_CLOSE: &str = "</answer>";
pub const TOOL_RESPONSE_OPEN: &str = "<tool_response>";

const OPENERS: [&str; 3] = [TOOL_CALL_OPEN, ANSWER_OPEN, TOOL_RESPONSE_OPEN];

/// 单个 tool_call 区域的解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unterminated <tool_call> region")]
    Unterminated,

    #[error("tool call is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("tool call must be a JSON object with a non-empty string \"name\"")]
    MissingName,

    #[error("invalid \"arguments\" for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },
}

/// 扫描事件
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    PlainText(String),
    ToolCallFound(Result<ToolCall, ProtocolError>),
    AnswerFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Text,
    InToolCall,
    InAnswer,
    /// 遇到 `<tool_response>`，之后的输入全部忽略
    Stopped,
}

/// 增量扫描器：feed 任意切分的片段，finish 收尾
#[derive(Debug)]
pub struct ProtocolScanner {
    state: ScanState,
    buf: String,
    transcript: String,
}

impl Default for ProtocolScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Text,
            buf: String::new(),
            transcript: String::new(),
        }
    }

    /// 已消费的输出文本（截至 `<tool_response>` 之前）；作为 assistant 消息写入对话
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// 已遇到 `<tool_response>`，后续片段不必再读
    pub fn is_stopped(&self) -> bool {
        self.state == ScanState::Stopped
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<ScanEvent> {
        if self.state == ScanState::Stopped {
            return Vec::new();
        }
        self.transcript.push_str(chunk);
        self.buf.push_str(chunk);

        let mut events = Vec::new();
        loop {
            match self.state {
                ScanState::Text => {
                    let next = OPENERS
                        .iter()
                        .filter_map(|m| self.buf.find(*m).map(|i| (i, *m)))
                        .min_by_key(|(i, _)| *i);
                    match next {
                        Some((idx, marker)) => {
                            if idx > 0 {
                                events.push(ScanEvent::PlainText(self.buf[..idx].to_string()));
                            }
                            if marker == TOOL_RESPONSE_OPEN {
                                let dropped = self.buf.len() - idx;
                                self.transcript.truncate(self.transcript.len() - dropped);
                                self.buf.clear();
                                self.state = ScanState::Stopped;
                                return events;
                            }
                            self.buf.drain(..idx + marker.len());
                            self.state = if marker == TOOL_CALL_OPEN {
                                ScanState::InToolCall
                            } else {
                                ScanState::InAnswer
                            };
                        }
                        None => {
                            // 末尾可能是被切开的标记前缀，先留着
                            let keep = partial_marker_suffix(&self.buf);
                            let emit_to = self.buf.len() - keep;
                            if emit_to > 0 {
                                events.push(ScanEvent::PlainText(self.buf[..emit_to].to_string()));
                                self.buf.drain(..emit_to);
                            }
                            return events;
                        }
                    }
                }
                ScanState::InToolCall => match self.buf.find(TOOL_CALL_CLOSE) {
                    Some(idx) => {
                        let body = self.buf[..idx].to_string();
                        self.buf.drain(..idx + TOOL_CALL_CLOSE.len());
                        events.push(ScanEvent::ToolCallFound(parse_tool_call(&body)));
                        self.state = ScanState::Text;
                    }
                    None => return events,
                },
                ScanState::InAnswer => match self.buf.find(ANSWER_CLOSE) {
                    Some(idx) => {
                        let body = self.buf[..idx].to_string();
                        self.buf.drain(..idx + ANSWER_CLOSE.len());
                        events.push(ScanEvent::AnswerFound(body));
                        self.state = ScanState::Text;
                    }
                    None => return events,
                },
                ScanState::Stopped => return events,
            }
        }
    }

    /// 输入结束：未闭合的 tool_call 记为协议错误，未闭合的 answer 视为普通文本
    pub fn finish(&mut self) -> Vec<ScanEvent> {
        let rest = std::mem::take(&mut self.buf);
        let state = std::mem::replace(&mut self.state, ScanState::Stopped);
        match state {
            ScanState::Text if !rest.is_empty() => vec![ScanEvent::PlainText(rest)],
            ScanState::InToolCall => vec![ScanEvent::ToolCallFound(Err(ProtocolError::Unterminated))],
            ScanState::InAnswer => vec![ScanEvent::PlainText(format!("{ANSWER_OPEN}{rest}"))],
            _ => Vec::new(),
        }
    }
}

/// buf 末尾与任一标记前缀重合的最长长度（不含完整标记）
fn partial_marker_suffix(buf: &str) -> usize {
    let mut best = 0;
    for marker in OPENERS {
        for n in (best + 1..marker.len()).rev() {
            if buf.ends_with(&marker[..n]) {
                best = n;
                break;
            }
        }
    }
    best
}

/// 解析单个 tool_call 区域：`{"name": ..., "arguments": {...}}`；arguments 也接受 JSON 字符串
pub fn parse_tool_call(body: &str) -> Result<ToolCall, ProtocolError> {
    let body = strip_code_fence(body.trim());
    let value: Value =
        serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let name = value
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(ProtocolError::MissingName)?
        .to_string();

    let arguments = match value.get("arguments") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                return Err(ProtocolError::InvalidArguments {
                    name,
                    reason: "string arguments must encode a JSON object".to_string(),
                })
            }
        },
        Some(_) => {
            return Err(ProtocolError::InvalidArguments {
                name,
                reason: "expected a JSON object".to_string(),
            })
        }
        None => {
            return Err(ProtocolError::InvalidArguments {
                name,
                reason: "missing \"arguments\"".to_string(),
            })
        }
    };

    Ok(ToolCall::new(name, arguments))
}

fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 一次完成的解析结论
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// 第一个 answer 区域的原文；出现 answer 时忽略所有 tool_call
    Answer(String),
    /// 按出现顺序排列的 tool_call 区域
    ToolCalls(Vec<Result<ToolCall, ProtocolError>>),
    /// 两种标记都没有
    Plain,
}

impl TurnOutcome {
    pub fn from_events(events: Vec<ScanEvent>) -> Self {
        let mut calls = Vec::new();
        for ev in events {
            match ev {
                ScanEvent::AnswerFound(answer) => return TurnOutcome::Answer(answer),
                ScanEvent::ToolCallFound(call) => calls.push(call),
                ScanEvent::PlainText(_) => {}
            }
        }
        if calls.is_empty() {
            TurnOutcome::Plain
        } else {
            TurnOutcome::ToolCalls(calls)
        }
    }
}

/// 非流式便捷入口：整段文本一次性解析
pub fn parse_completion(text: &str) -> TurnOutcome {
    let mut scanner = ProtocolScanner::new();
    let mut events = scanner.feed(text);
    events.extend(scanner.finish());
    TurnOutcome::from_events(events)
}
