//! Conversation Memory
//!
//! Memory feeds prior exchanges back into a run as extra inputs and
//! records each successful run afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

use crate::decision::{Inputs, Outputs};
use crate::error::{AgentError, Result};

/// History store consumed by the executor
pub trait Memory: Send + Sync {
    /// Keys [`Memory::load`] contributes
    fn memory_variables(&self) -> Vec<String>;

    /// Variables to merge into the run inputs
    fn load(&self, inputs: &Inputs) -> Result<Inputs>;

    /// Record a finished exchange
    fn save(&self, inputs: &Inputs, outputs: &Outputs) -> Result<()>;

    fn clear(&self);
}

/// Who said a buffered line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Ai,
}

/// A buffered conversation turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// In-process buffer rendering `Human: ..` / `AI: ..` lines
#[derive(Debug)]
pub struct BufferMemory {
    messages: Mutex<Vec<ChatMessage>>,
    memory_key: String,
    human_prefix: String,
    ai_prefix: String,
    input_key: Option<String>,
    output_key: Option<String>,
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            memory_key: "history".into(),
            human_prefix: "Human".into(),
            ai_prefix: "AI".into(),
            input_key: None,
            output_key: None,
        }
    }
}

impl BufferMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_key(mut self, key: impl Into<String>) -> Self {
        self.memory_key = key.into();
        self
    }

    pub fn with_prefixes(mut self, human: impl Into<String>, ai: impl Into<String>) -> Self {
        self.human_prefix = human.into();
        self.ai_prefix = ai.into();
        self
    }

    /// Input key holding the human turn, when inputs carry more than one
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Output key holding the AI turn, when outputs carry more than one
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The buffer as prompt text
    pub fn buffer(&self) -> String {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|message| {
                let prefix = match message.speaker {
                    Speaker::Human => &self.human_prefix,
                    Speaker::Ai => &self.ai_prefix,
                };
                format!("{prefix}: {}", message.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn pick<'a>(configured: Option<&'a String>, candidates: Vec<&'a String>, what: &str) -> Result<&'a String> {
        if let Some(key) = configured {
            return Ok(key);
        }
        match candidates.as_slice() {
            [key] => Ok(*key),
            [] => Err(AgentError::Memory(format!("no {what} key to record"))),
            keys => Err(AgentError::Memory(format!(
                "ambiguous {what} key, one of: {}",
                keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Memory for BufferMemory {
    fn memory_variables(&self) -> Vec<String> {
        vec![self.memory_key.clone()]
    }

    fn load(&self, _inputs: &Inputs) -> Result<Inputs> {
        let mut vars = Inputs::new();
        vars.insert(self.memory_key.clone(), Value::String(self.buffer()));
        Ok(vars)
    }

    fn save(&self, inputs: &Inputs, outputs: &Outputs) -> Result<()> {
        let input_candidates = inputs.keys().filter(|key| **key != self.memory_key).collect();
        let input_key = Self::pick(self.input_key.as_ref(), input_candidates, "input")?;
        let output_key = Self::pick(self.output_key.as_ref(), outputs.keys().collect(), "output")?;

        let human = inputs
            .get(input_key)
            .ok_or_else(|| AgentError::Memory(format!("input '{input_key}' not present")))?;
        let ai = outputs
            .get(output_key)
            .ok_or_else(|| AgentError::Memory(format!("output '{output_key}' not present")))?;

        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push(ChatMessage::new(Speaker::Human, as_text(human)));
        messages.push(ChatMessage::new(Speaker::Ai, as_text(ai)));
        Ok(())
    }

    fn clear(&self) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
