//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent and executor error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Reasoning backend failed to produce text
    #[error("Generation error: {0}")]
    Generation(String),

    /// Backend output did not match the decision grammar
    #[error("Parse error: {0}")]
    Parse(String),

    /// An action named a tool absent from the registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool's own execution failed
    #[error("Tool '{tool}' failed: {source}")]
    ToolInvocation {
        tool: String,
        #[source]
        source: ToolError,
    },

    /// Two tools share a name at registry construction
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// Early-stopping policy name is not `force` or `generate`
    #[error("Unsupported early stopping policy: {0}")]
    UnsupportedPolicy(String),

    /// Caller did not supply every key the agent requires
    #[error("Missing input keys: {}", .0.join(", "))]
    MissingInputKeys(Vec<String>),

    /// Prompt template could not be rendered
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Memory collaborator failed to load or save
    #[error("Memory error: {0}")]
    Memory(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Wrap a tool failure with the name of the tool that raised it
    pub fn tool_invocation(tool: impl Into<String>, source: ToolError) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            source,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Generation(_) => "The reasoning service failed to respond. Please try again.".into(),
            Self::Parse(_) => "The agent produced a response it could not act on.".into(),
            Self::UnknownTool(name) => format!("The tool '{name}' is not available."),
            Self::ToolInvocation { tool, source } => format!("Tool '{tool}' failed: {source}"),
            Self::MissingInputKeys(keys) => format!("Missing required inputs: {}", keys.join(", ")),
            Self::DuplicateTool(_) | Self::UnsupportedPolicy(_) | Self::Config(_) => {
                "The agent is misconfigured.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Errors raised by tool implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Input did not have the shape the tool expects
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tool ran but could not complete
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_invocation_keeps_source() {
        let err = AgentError::tool_invocation("search", ToolError::ExecutionFailed("timeout".into()));
        assert_eq!(err.to_string(), "Tool 'search' failed: execution failed: timeout");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn missing_keys_are_listed() {
        let err = AgentError::MissingInputKeys(vec!["input".into(), "history".into()]);
        assert_eq!(err.to_string(), "Missing input keys: input, history");
        assert!(err.user_message().contains("input, history"));
    }

    #[test]
    fn anyhow_converts_to_other() {
        let err: AgentError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AgentError::Other(ref msg) if msg == "boom"));
    }
}
