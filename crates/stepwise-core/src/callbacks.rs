//! Instrumentation
//!
//! The executor reports every lifecycle transition to a [`Callbacks`] value
//! it was constructed with. Handlers observe; they cannot fail the run or
//! change what it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::decision::{AgentAction, AgentFinish, Inputs, Outputs, ToolInput};
use crate::error::AgentError;

/// Agent-specific prefixes handed to tool-end notifications
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLoggingContext {
    pub observation_prefix: String,
    pub llm_prefix: String,
}

/// A single lifecycle notification
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallbackEvent {
    RunStarted {
        run_id: Uuid,
        inputs: Inputs,
        timestamp: DateTime<Utc>,
    },
    ActionChosen {
        run_id: Uuid,
        action: AgentAction,
        timestamp: DateTime<Utc>,
    },
    ToolStarted {
        run_id: Uuid,
        tool: String,
        input: ToolInput,
        timestamp: DateTime<Utc>,
    },
    ToolEnded {
        run_id: Uuid,
        tool: String,
        observation: String,
        context: ToolLoggingContext,
        timestamp: DateTime<Utc>,
    },
    ToolErrored {
        run_id: Uuid,
        tool: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: Uuid,
        return_values: Outputs,
        log: String,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl CallbackEvent {
    /// Short name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::ActionChosen { .. } => "action_chosen",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolEnded { .. } => "tool_ended",
            Self::ToolErrored { .. } => "tool_errored",
            Self::RunFinished { .. } => "run_finished",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::ActionChosen { run_id, .. }
            | Self::ToolStarted { run_id, .. }
            | Self::ToolEnded { run_id, .. }
            | Self::ToolErrored { run_id, .. }
            | Self::RunFinished { run_id, .. }
            | Self::RunFailed { run_id, .. } => *run_id,
        }
    }
}

/// Receives lifecycle notifications
pub trait CallbackHandler: Send + Sync {
    fn on_event(&self, event: &CallbackEvent);
}

/// Fan-out over the handlers attached to an executor
#[derive(Clone, Default)]
pub struct Callbacks {
    handlers: Vec<Arc<dyn CallbackHandler>>,
}

impl Callbacks {
    pub fn new(handlers: Vec<Arc<dyn CallbackHandler>>) -> Self {
        Self { handlers }
    }

    /// No handlers; every notification is dropped
    pub fn none() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn CallbackHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn emit(&self, event: &CallbackEvent) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }

    pub fn on_run_start(&self, run_id: Uuid, inputs: &Inputs) {
        self.emit(&CallbackEvent::RunStarted {
            run_id,
            inputs: inputs.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_action_chosen(&self, run_id: Uuid, action: &AgentAction) {
        self.emit(&CallbackEvent::ActionChosen {
            run_id,
            action: action.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_tool_start(&self, run_id: Uuid, action: &AgentAction) {
        self.emit(&CallbackEvent::ToolStarted {
            run_id,
            tool: action.tool.clone(),
            input: action.tool_input.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_tool_end(&self, run_id: Uuid, tool: &str, observation: &str, context: &ToolLoggingContext) {
        self.emit(&CallbackEvent::ToolEnded {
            run_id,
            tool: tool.to_string(),
            observation: observation.to_string(),
            context: context.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_tool_error(&self, run_id: Uuid, tool: &str, error: &AgentError) {
        self.emit(&CallbackEvent::ToolErrored {
            run_id,
            tool: tool.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_run_finish(&self, run_id: Uuid, finish: &AgentFinish) {
        self.emit(&CallbackEvent::RunFinished {
            run_id,
            return_values: finish.return_values.clone(),
            log: finish.log.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn on_run_error(&self, run_id: Uuid, error: &AgentError) {
        self.emit(&CallbackEvent::RunFailed {
            run_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").field("handlers", &self.handlers.len()).finish()
    }
}

/// Writes events to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingHandler;

impl CallbackHandler for TracingHandler {
    fn on_event(&self, event: &CallbackEvent) {
        match event {
            CallbackEvent::RunStarted { run_id, inputs, .. } => {
                tracing::info!(%run_id, inputs = inputs.len(), "Run started");
            }
            CallbackEvent::ActionChosen { run_id, action, .. } => {
                tracing::info!(%run_id, tool = %action.tool, input = %action.tool_input, "{}", action.log);
            }
            CallbackEvent::ToolStarted { run_id, tool, .. } => {
                tracing::debug!(%run_id, %tool, "Tool started");
            }
            CallbackEvent::ToolEnded {
                run_id,
                tool,
                observation,
                context,
                ..
            } => {
                tracing::info!(
                    %run_id,
                    %tool,
                    "{}{}\n{}",
                    context.observation_prefix,
                    observation,
                    context.llm_prefix
                );
            }
            CallbackEvent::ToolErrored { run_id, tool, error, .. } => {
                tracing::warn!(%run_id, %tool, %error, "Tool failed");
            }
            CallbackEvent::RunFinished { run_id, log, .. } => {
                tracing::info!(%run_id, "{}", log);
            }
            CallbackEvent::RunFailed { run_id, error, .. } => {
                tracing::warn!(%run_id, %error, "Run failed");
            }
        }
    }
}

/// Keeps every event in memory for later inspection
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Event kinds in the order they were received
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(CallbackEvent::kind)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl CallbackHandler for RecordingHandler {
    fn on_event(&self, event: &CallbackEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Publishes events on a broadcast channel
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub; publishing
/// with no subscribers is fine.
pub struct BroadcastHandler {
    sender: broadcast::Sender<Arc<CallbackEvent>>,
}

impl BroadcastHandler {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CallbackEvent>> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastHandler {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CallbackHandler for BroadcastHandler {
    fn on_event(&self, event: &CallbackEvent) {
        let _ = self.sender.send(Arc::new(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_reaches_every_handler() {
        let first = Arc::new(RecordingHandler::new());
        let second = Arc::new(RecordingHandler::new());
        let callbacks = Callbacks::new(vec![
            first.clone() as Arc<dyn CallbackHandler>,
            second.clone() as Arc<dyn CallbackHandler>,
        ]);
        let run_id = Uuid::new_v4();

        let action = AgentAction::new("calculator", "2+2", "");
        callbacks.on_action_chosen(run_id, &action);
        callbacks.on_tool_end(run_id, "calculator", "4", &ToolLoggingContext::default());

        assert_eq!(first.kinds(), vec!["action_chosen", "tool_ended"]);
        assert_eq!(second.kinds(), first.kinds());
        assert!(first.events().iter().all(|e| e.run_id() == run_id));
    }

    #[test]
    fn empty_callbacks_do_nothing() {
        let callbacks = Callbacks::none();
        assert!(callbacks.is_empty());
        callbacks.on_run_error(Uuid::new_v4(), &AgentError::Parse("x".into()));
    }

    #[tokio::test]
    async fn broadcast_publish_subscribe() {
        let handler = Arc::new(BroadcastHandler::new(16));
        let mut rx = handler.subscribe();
        let callbacks = Callbacks::new(vec![handler.clone() as Arc<dyn CallbackHandler>]);

        callbacks.on_run_finish(Uuid::new_v4(), &AgentFinish::single("output", "4", "done"));

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            CallbackEvent::RunFinished { log, return_values, .. } => {
                assert_eq!(log, "done");
                assert_eq!(return_values["output"], "4");
            }
            other => panic!("Expected RunFinished event, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_without_subscribers_doesnt_panic() {
        let handler = BroadcastHandler::default();
        handler.on_event(&CallbackEvent::RunFailed {
            run_id: Uuid::new_v4(),
            error: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = CallbackEvent::ToolErrored {
            run_id: Uuid::nil(),
            tool: "search".into(),
            error: "down".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "tool_errored");
        assert_eq!(value["tool"], "search");
    }
}
