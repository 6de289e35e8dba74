//! Output Parsers
//!
//! Turn raw model text into a [`Decision`]. The grammar is swappable; the
//! executor only ever sees the parsed decision.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::decision::{AgentAction, AgentFinish, Decision, ToolInput};
use crate::error::{AgentError, Result};

/// Default return key for single-output agents
pub const OUTPUT_KEY: &str = "output";

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";

/// Parses model text into a decision
pub trait OutputParser: Send + Sync {
    /// Parse text; fails with [`AgentError::Parse`] when it fits no known shape
    fn parse(&self, text: &str) -> Result<Decision>;

    /// Instructions that teach the model this grammar
    fn format_instructions(&self, tool_names: &str) -> String;
}

/// Zero-shot ReAct grammar
///
/// ```text
/// Thought: ...
/// Action: calculator
/// Action Input: 2 + 2
/// ```
///
/// or `Final Answer: ...`.
#[derive(Clone, Debug, Default)]
pub struct ReactOutputParser;

impl OutputParser for ReactOutputParser {
    fn parse(&self, text: &str) -> Result<Decision> {
        if let Some(idx) = text.rfind(FINAL_ANSWER) {
            let answer = text[idx + FINAL_ANSWER.len()..].trim();
            return Ok(Decision::finish(AgentFinish::single(OUTPUT_KEY, answer, text)));
        }

        parse_action(text)
            .ok_or_else(|| AgentError::Parse(format!("could not parse model output: `{text}`")))
    }

    fn format_instructions(&self, tool_names: &str) -> String {
        format!(
            "Use the following format:\n\n\
             Question: the input question you must answer\n\
             Thought: you should always think about what to do\n\
             Action: the action to take, should be one of [{tool_names}]\n\
             Action Input: the input to the action\n\
             Observation: the result of the action\n\
             ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
             Thought: I now know the final answer\n\
             Final Answer: the final answer to the original input question"
        )
    }
}

/// Conversational grammar: `<ai_prefix>: reply` finishes, otherwise an action
#[derive(Clone, Debug)]
pub struct ConversationalOutputParser {
    ai_prefix: String,
}

impl ConversationalOutputParser {
    pub fn new(ai_prefix: impl Into<String>) -> Self {
        Self {
            ai_prefix: ai_prefix.into(),
        }
    }
}

impl Default for ConversationalOutputParser {
    fn default() -> Self {
        Self::new("AI")
    }
}

impl OutputParser for ConversationalOutputParser {
    fn parse(&self, text: &str) -> Result<Decision> {
        let marker = format!("{}:", self.ai_prefix);
        if let Some(idx) = rfind_at_line_start(text, &marker) {
            let reply = text[idx + marker.len()..].trim();
            return Ok(Decision::finish(AgentFinish::single(OUTPUT_KEY, reply, text)));
        }

        parse_action(text)
            .ok_or_else(|| AgentError::Parse(format!("could not parse model output: `{text}`")))
    }

    fn format_instructions(&self, tool_names: &str) -> String {
        format!(
            "To use a tool, please use the following format:\n\n\
             Thought: Do I need to use a tool? Yes\n\
             Action: the action to take, should be one of [{tool_names}]\n\
             Action Input: the input to the action\n\
             Observation: the result of the action\n\n\
             When you have a response to say to the Human, or if you do not need to use a tool, \
             you MUST use the format:\n\n\
             Thought: Do I need to use a tool? No\n\
             {}: [your response here]",
            self.ai_prefix
        )
    }
}

#[derive(Deserialize)]
struct ToolCallPayload {
    tool: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// JSON tool-block grammar
///
/// A fenced ```` ```tool ```` block (or inline JSON object with a `tool`
/// key) is an action; text without one is the final answer.
#[derive(Clone, Debug, Default)]
pub struct JsonToolParser;

impl JsonToolParser {
    const BLOCK_START: &'static str = "```tool";
    const BLOCK_END: &'static str = "```";

    fn action(payload: ToolCallPayload, log: &str) -> Decision {
        Decision::Actions {
            actions: vec![AgentAction::new(
                payload.tool,
                ToolInput::Structured(payload.arguments),
                log.trim(),
            )],
        }
    }

    /// Try to parse inline JSON tool call
    fn parse_inline(content: &str) -> Option<ToolCallPayload> {
        if !content.contains(r#""tool""#) {
            return None;
        }

        let start = content.find('{')?;
        let end = content.rfind('}')?;
        if end <= start {
            return None;
        }

        serde_json::from_str::<ToolCallPayload>(&content[start..=end]).ok()
    }
}

impl OutputParser for JsonToolParser {
    fn parse(&self, text: &str) -> Result<Decision> {
        if let Some(start_idx) = text.find(Self::BLOCK_START) {
            let after_marker = &text[start_idx + Self::BLOCK_START.len()..];
            let end_idx = after_marker
                .find(Self::BLOCK_END)
                .ok_or_else(|| AgentError::Parse("unterminated tool block".into()))?;
            let payload = serde_json::from_str::<ToolCallPayload>(after_marker[..end_idx].trim())
                .map_err(|e| AgentError::Parse(format!("malformed tool block: {e}")))?;
            return Ok(Self::action(payload, &text[..start_idx]));
        }

        if let Some(payload) = Self::parse_inline(text) {
            return Ok(Self::action(payload, ""));
        }

        Ok(Decision::finish(AgentFinish::single(OUTPUT_KEY, text.trim(), text)))
    }

    fn format_instructions(&self, tool_names: &str) -> String {
        format!(
            "When you need to use a tool (one of [{tool_names}]), respond with a JSON block \
             in this exact format:\n\
             ```tool\n{{\"tool\": \"tool_name\", \"arguments\": {{\"arg1\": \"value1\"}}}}\n```\n\n\
             If you can answer directly without tools, do so."
        )
    }
}

#[derive(Deserialize)]
struct ActionBlob {
    action: String,
    #[serde(default)]
    action_input: Value,
}

/// Chat grammar: a fenced JSON blob naming one action
///
/// ```text
/// Action:
/// ```
/// {"action": "calculator", "action_input": "2 + 2"}
/// ```
/// ```
///
/// The reserved action `Final Answer` (or a `Final Answer:` line) finishes.
#[derive(Clone, Debug, Default)]
pub struct ChatOutputParser;

impl ChatOutputParser {
    const FENCE: &'static str = "```";
    const FINISH_ACTION: &'static str = "Final Answer";

    fn input_text(value: &Value) -> String {
        match value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl OutputParser for ChatOutputParser {
    fn parse(&self, text: &str) -> Result<Decision> {
        if let Some(idx) = text.rfind(FINAL_ANSWER) {
            let answer = text[idx + FINAL_ANSWER.len()..].trim();
            return Ok(Decision::finish(AgentFinish::single(OUTPUT_KEY, answer, text)));
        }

        let open = text
            .find(Self::FENCE)
            .ok_or_else(|| AgentError::Parse(format!("could not parse model output: `{text}`")))?;
        let after_fence = &text[open + Self::FENCE.len()..];
        // Skip an optional language tag such as `json`
        let body_start = after_fence
            .find('\n')
            .filter(|&nl| !after_fence[..nl].contains('{'))
            .map_or(0, |nl| nl + 1);
        let body = &after_fence[body_start..];
        let close = body
            .find(Self::FENCE)
            .ok_or_else(|| AgentError::Parse("unterminated action blob".into()))?;
        let blob_end = open + Self::FENCE.len() + body_start + close + Self::FENCE.len();

        let blob: ActionBlob = serde_json::from_str(body[..close].trim())
            .map_err(|e| AgentError::Parse(format!("malformed action blob: {e}")))?;

        if blob.action == Self::FINISH_ACTION {
            let answer = Self::input_text(&blob.action_input);
            return Ok(Decision::finish(AgentFinish::single(OUTPUT_KEY, answer, text)));
        }

        let tool_input = match blob.action_input {
            Value::Object(map) => ToolInput::Structured(map),
            other => ToolInput::Text(Self::input_text(&other)),
        };
        Ok(Decision::Actions {
            actions: vec![AgentAction::new(blob.action, tool_input, &text[..blob_end])],
        })
    }

    fn format_instructions(&self, tool_names: &str) -> String {
        format!(
            "The way you use the tools is by specifying a json blob.\n\
             Specifically, this json should have a `action` key (with the name of the tool to use) \
             and a `action_input` key (with the input to the tool going here).\n\n\
             The only values that should be in the \"action\" field are: {tool_names}\n\n\
             The $JSON_BLOB should only contain a SINGLE action, do NOT return a list of multiple actions. \
             Here is an example of a valid $JSON_BLOB:\n\n\
             ```\n{{\n  \"action\": $TOOL_NAME,\n  \"action_input\": $INPUT\n}}\n```\n\n\
             ALWAYS use the following format:\n\n\
             Question: the input question you must answer\n\
             Thought: you should always think about what to do\n\
             Action:\n```\n$JSON_BLOB\n```\n\
             Observation: the result of the action\n\
             ... (this Thought/Action/Observation can repeat N times)\n\
             Thought: I now know the final answer\n\
             Final Answer: the final answer to the original input question"
        )
    }
}

/// Byte offset of the last `marker` that opens a line
fn rfind_at_line_start(text: &str, marker: &str) -> Option<usize> {
    text.match_indices(marker)
        .map(|(idx, _)| idx)
        .filter(|&idx| {
            let line_start = text[..idx].rfind('\n').map_or(0, |nl| nl + 1);
            text[line_start..idx].trim().is_empty()
        })
        .last()
}

/// `Action:` / `Action Input:` extraction shared by the text grammars
fn parse_action(text: &str) -> Option<Decision> {
    let action_idx = text.find(ACTION)?;
    let after_action = &text[action_idx + ACTION.len()..];
    let tool = after_action.lines().next()?.trim();
    if tool.is_empty() {
        return None;
    }

    let input_start = action_idx + ACTION.len() + after_action.find(ACTION_INPUT)? + ACTION_INPUT.len();
    // Drop anything the model hallucinated past its own action
    let input_end = text[input_start..]
        .find("\nObservation")
        .map_or(text.len(), |obs| input_start + obs);
    let raw_input = text[input_start..input_end].trim();
    let unquoted = raw_input
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw_input);

    let tool_input = match serde_json::from_str::<Value>(unquoted) {
        Ok(Value::Object(map)) => ToolInput::Structured(map),
        _ => ToolInput::Text(unquoted.to_string()),
    };

    Some(Decision::Actions {
        actions: vec![AgentAction::new(tool, tool_input, &text[..input_end])],
    })
}
