//! Decisions
//!
//! The structured result of one reasoning step, plus the history records
//! the executor accumulates from resolved actions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Caller-supplied inputs to a run, keyed by prompt variable
pub type Inputs = HashMap<String, Value>;

/// Values returned from a finished run
pub type Outputs = HashMap<String, Value>;

/// Tool-specific input carried by an action
///
/// The executor never looks inside; only the tool interprets it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolInput {
    Text(String),
    Structured(Map<String, Value>),
}

impl ToolInput {
    /// Text view of the input, if it is plain text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    /// Look up a field of a structured input
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Structured(map) => map.get(key),
        }
    }
}

impl fmt::Display for ToolInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Structured(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for ToolInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ToolInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for ToolInput {
    fn from(map: Map<String, Value>) -> Self {
        Self::Structured(map)
    }
}

/// Request to invoke a tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Tool name, resolved against the registry
    pub tool: String,

    /// Opaque input handed to the tool
    pub tool_input: ToolInput,

    /// Model rationale that led to this action, replayed into the scratchpad
    pub log: String,
}

impl AgentAction {
    pub fn new(tool: impl Into<String>, tool_input: impl Into<ToolInput>, log: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            tool_input: tool_input.into(),
            log: log.into(),
        }
    }
}

/// Terminal decision carrying the run's return values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentFinish {
    pub return_values: Outputs,
    pub log: String,
}

impl AgentFinish {
    pub fn new(return_values: Outputs, log: impl Into<String>) -> Self {
        Self {
            return_values,
            log: log.into(),
        }
    }

    /// Finish with a single return value
    pub fn single(key: impl Into<String>, value: impl Into<Value>, log: impl Into<String>) -> Self {
        let mut return_values = Outputs::new();
        return_values.insert(key.into(), value.into());
        Self::new(return_values, log)
    }

    /// Keys the finish declares that the output contract requires but are absent
    pub fn missing_keys(&self, output_keys: &[String]) -> Vec<String> {
        output_keys
            .iter()
            .filter(|key| !self.return_values.contains_key(*key))
            .cloned()
            .collect()
    }
}

/// Outcome of one `Agent::plan` call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// One or more tool invocations, resolved in order
    Actions { actions: Vec<AgentAction> },
    /// The agent is done
    Finish { finish: AgentFinish },
}

impl Decision {
    /// A decision holding a single action
    pub fn action(tool: impl Into<String>, tool_input: impl Into<ToolInput>, log: impl Into<String>) -> Self {
        Self::Actions {
            actions: vec![AgentAction::new(tool, tool_input, log)],
        }
    }

    pub fn finish(finish: AgentFinish) -> Self {
        Self::Finish { finish }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    /// Check the decision against the agent's output contract
    pub fn validate(&self, output_keys: &[String]) -> Result<()> {
        match self {
            Self::Actions { actions } if actions.is_empty() => {
                Err(AgentError::Parse("decision contains no actions".into()))
            }
            Self::Actions { actions } => match actions.iter().find(|a| a.tool.trim().is_empty()) {
                Some(_) => Err(AgentError::Parse("action has an empty tool name".into())),
                None => Ok(()),
            },
            Self::Finish { finish } => {
                let missing = finish.missing_keys(output_keys);
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(AgentError::Parse(format!(
                        "finish is missing return values: {}",
                        missing.join(", ")
                    )))
                }
            }
        }
    }
}

/// A resolved action and the observation its tool returned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: AgentAction,
    pub observation: String,
}

impl Step {
    pub fn new(action: AgentAction, observation: impl Into<String>) -> Self {
        Self {
            action,
            observation: observation.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_input_deserializes_both_shapes() {
        let text: ToolInput = serde_json::from_value(json!("2+2")).unwrap();
        assert_eq!(text, ToolInput::Text("2+2".into()));

        let structured: ToolInput = serde_json::from_value(json!({"city": "Oslo"})).unwrap();
        assert_eq!(structured.get("city"), Some(&json!("Oslo")));
        assert_eq!(structured.to_string(), r#"{"city":"Oslo"}"#);
    }

    #[test]
    fn validate_rejects_empty_tool_name() {
        let decision = Decision::action("  ", "x", "");
        assert!(matches!(decision.validate(&[]), Err(AgentError::Parse(_))));

        let empty = Decision::Actions { actions: vec![] };
        assert!(empty.validate(&[]).is_err());
    }

    #[test]
    fn validate_checks_output_contract() {
        let keys = vec!["output".to_string()];
        let good = Decision::finish(AgentFinish::single("output", "done", ""));
        assert!(good.validate(&keys).is_ok());

        let bad = Decision::finish(AgentFinish::single("answer", "done", ""));
        let err = bad.validate(&keys).unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn decision_serializes_with_kind_tag() {
        let value = serde_json::to_value(Decision::action("calculator", "2+2", "thinking")).unwrap();
        assert_eq!(value["kind"], "actions");
        assert_eq!(value["actions"][0]["tool_input"], "2+2");
    }
}
