//! Prompt 模板：研究助手 system prompt、Extractor 指令、循环内的纠偏提示

use crate::react::parser::ProtocolError;

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a deep research assistant. Your core function is to conduct thorough, multi-source investigations into any topic. You must handle both broad, open-domain inquiries and queries within specialized academic fields. For every request, synthesize information from credible, diverse sources to deliver a comprehensive, accurate, and objective response. When you have gathered sufficient information and are ready to provide the definitive response, you must enclose the entire final answer within <answer></answer> tags.

# Tools

You may call one or more functions to assist with the user query.

You are provided with function signatures within <tools></tools> XML tags:
<tools>
{tools}
</tools>

For each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:
<tool_call>
{"name": <function-name>, "arguments": <args-json-object>}
</tool_call>

Current date: {date}"#;

const EXTRACTOR_PROMPT_TEMPLATE: &str = r#"Please process the following webpage content and user goal to extract relevant information:

## **Webpage Content** 
{content}

## **User Goal**
{goal}

## **Task Guidelines**
1. **Content Scanning for Rationale**: Locate the **specific sections/data** directly related to the user's goal within the webpage content
2. **Key Extraction for Evidence**: Identify and extract the **most relevant information** from the content, you never miss any important information, output the **full original context** of the content as far as possible, it can be more than three paragraphs.
3. **Summary Output for Summary**: Organize into a concise paragraph with logical flow, prioritizing clarity and judge the contribution of the information to the goal.

**Final Output Format using JSON format has "rational", "evidence", "summary" fields**
"#;

/// 模型既没调用工具也没作答时追加的提示
pub const CONTINUE_PROMPT: &str = "Your last reply contained neither a <tool_call> nor an <answer>. Continue the research by calling a tool inside <tool_call></tool_call> tags, or give the final answer inside <answer></answer> tags.";

/// 上下文预算耗尽时强制作答
pub const FORCE_ANSWER_PROMPT: &str = "You have now reached the maximum context length you can handle. You should stop making tool calls and, based on all the information above, think again and provide what you consider the most likely answer in the following format:<think>your final thinking</think>\n<answer>your answer</answer>";

/// 研究 system prompt：tools 为每行一个 function 签名，date 形如 2025-01-31
pub fn system_prompt(tools: &str, date: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE
        .replace("{tools}", tools)
        .replace("{date}", date)
}

/// 以今天日期生成 system prompt
pub fn system_prompt_today(tools: &str) -> String {
    system_prompt(tools, &chrono::Local::now().format("%Y-%m-%d").to_string())
}

pub fn extractor_prompt(content: &str, goal: &str) -> String {
    // goal 先替换：页面内容里可能恰好含有 "{goal}"
    EXTRACTOR_PROMPT_TEMPLATE
        .replace("{goal}", goal)
        .replacen("{content}", content, 1)
}

/// tool_call 区域解析失败时回填给模型的说明
pub fn protocol_error_feedback(err: &ProtocolError) -> String {
    format!(
        "[Tool Error]: Could not parse tool call: {err}. Use exactly this format:\n<tool_call>\n{{\"name\": <function-name>, \"arguments\": <args-json-object>}}\n</tool_call>"
    )
}
