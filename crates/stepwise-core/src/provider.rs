//! Reasoning Backend
//!
//! The executor consumes the model only through [`Predictor`]: a single
//! `predict(inputs) -> text` capability. [`LlmChain`] builds one from a
//! prompt template and any [`LlmProvider`], so backends can be swapped
//! without touching agent logic.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stepwise_core::provider::{GenerationOptions, LlmChain};
//!
//! let chain = LlmChain::new(provider, prompt, GenerationOptions::default());
//! let text = chain.predict(&inputs).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::decision::Inputs;
use crate::error::{AgentError, Result};
use crate::prompt::PromptTemplate;

/// Input key carrying the stop-sequence list
pub const STOP_KEY: &str = "stop";

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4", "claude-3-sonnet")
    pub model: String,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_max_tokens() -> u32 { 2048 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end or a stop sequence
    Stop,
    /// Cut off at `max_tokens`
    Length,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Generate a completion for a rendered prompt
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<Completion>;
}

/// The single-shot completion capability agents plan with
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Keys `predict` reads from its inputs
    fn input_keys(&self) -> Vec<String>;

    /// Produce raw text for the given inputs
    async fn predict(&self, inputs: &Inputs) -> Result<String>;
}

/// Prompt template + provider, exposed as a [`Predictor`]
pub struct LlmChain {
    provider: Arc<dyn LlmProvider>,
    prompt: PromptTemplate,
    options: GenerationOptions,
}

impl LlmChain {
    pub fn new(provider: Arc<dyn LlmProvider>, prompt: PromptTemplate, options: GenerationOptions) -> Self {
        Self {
            provider,
            prompt,
            options,
        }
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    fn stop_sequences(inputs: &Inputs) -> Vec<String> {
        match inputs.get(STOP_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Predictor for LlmChain {
    fn input_keys(&self) -> Vec<String> {
        self.prompt.input_variables().to_vec()
    }

    async fn predict(&self, inputs: &Inputs) -> Result<String> {
        let prompt = self.prompt.format(inputs)?;

        let mut options = self.options.clone();
        let stop = Self::stop_sequences(inputs);
        if !stop.is_empty() {
            options.stop_sequences = stop;
        }

        let completion = self
            .provider
            .complete(&prompt, &options)
            .await
            .map_err(|e| match e {
                AgentError::Generation(_) => e,
                other => AgentError::Generation(other.to_string()),
            })?;

        if completion.finish_reason == Some(FinishReason::Length) {
            tracing::warn!(
                provider = self.provider.name(),
                max_tokens = options.max_tokens,
                "Completion truncated at token limit"
            );
        }

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                provider = self.provider.name(),
                model = %completion.model,
                total_tokens = usage.total_tokens,
                "Completion received"
            );
        }

        Ok(completion.content)
    }
}

/// A prompt and stop list as seen by [`ScriptedProvider`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub prompt: String,
    pub stop_sequences: Vec<String>,
}

/// In-process provider replaying canned completions in order
///
/// Useful offline and in tests. Running out of completions is a
/// generation error. Each completion is cut at the first stop sequence and
/// at `max_tokens` whitespace-separated words, the way a real backend
/// would; usage is counted in the same words.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Completions not yet consumed
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<Completion> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                prompt: prompt.to_string(),
                stop_sequences: options.stop_sequences.clone(),
            });

        let content = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| AgentError::Generation("scripted provider has no completions left".into()))?;

        let content = truncate_at_stop(&content, &options.stop_sequences);
        let max_words = usize::try_from(options.max_tokens).unwrap_or(usize::MAX);
        let (content, finish_reason) = match truncate_words(content, max_words) {
            Some(cut) => (cut, FinishReason::Length),
            None => (content, FinishReason::Stop),
        };

        let prompt_tokens = word_count(prompt);
        let completion_tokens = word_count(content);
        Ok(Completion {
            content: content.to_string(),
            model: options.model.clone(),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            }),
            finish_reason: Some(finish_reason),
        })
    }
}

fn truncate_at_stop<'a>(text: &'a str, stop_sequences: &[String]) -> &'a str {
    stop_sequences
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
        .map_or(text, |idx| &text[..idx])
}

/// Text up to the end of its `max` word, or `None` if it is short enough
fn truncate_words(text: &str, max: usize) -> Option<&str> {
    let mut words = 0;
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            words += 1;
            if words > max {
                return Some(text[..idx].trim_end());
            }
        }
    }
    None
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "llama3.2");
        assert!(opts.stop_sequences.is_empty());
    }

    #[tokio::test]
    async fn chain_formats_prompt_and_forwards_stop() {
        let provider = Arc::new(ScriptedProvider::new(["Final Answer: 4"]));
        let prompt = PromptTemplate::new("Q: {input}").unwrap();
        let chain = LlmChain::new(provider.clone(), prompt, GenerationOptions::default());

        let mut inputs = Inputs::new();
        inputs.insert("input".into(), json!("2+2?"));
        inputs.insert(STOP_KEY.into(), json!(["\nObservation:"]));

        let text = chain.predict(&inputs).await.unwrap();
        assert_eq!(text, "Final Answer: 4");
        assert_eq!(
            provider.calls(),
            vec![RecordedCall {
                prompt: "Q: 2+2?".into(),
                stop_sequences: vec!["\nObservation:".into()],
            }]
        );
        assert_eq!(chain.input_keys(), vec!["input".to_string()]);
    }

    #[tokio::test]
    async fn scripted_completion_honours_stop_and_length() {
        let provider = ScriptedProvider::new([
            "Action: calculator\nAction Input: 2+2\nObservation: 5\nThought: done",
            "one two three four five",
        ]);
        let options = GenerationOptions {
            max_tokens: 3,
            stop_sequences: vec!["\nObservation:".into()],
            ..GenerationOptions::default()
        };

        let stopped = provider.complete("Q: 2+2?", &options).await.unwrap();
        assert_eq!(stopped.content, "Action: calculator\nAction Input: 2+2");
        assert_eq!(stopped.finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            stopped.usage,
            Some(TokenUsage {
                prompt_tokens: 2,
                completion_tokens: 5,
                total_tokens: 7,
            })
        );

        let cut = provider.complete("Q", &options).await.unwrap();
        assert_eq!(cut.content, "one two three");
        assert_eq!(cut.finish_reason, Some(FinishReason::Length));
        assert_eq!(cut.model, "llama3.2");
    }

    #[tokio::test]
    async fn exhausted_script_is_a_generation_error() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let chain = LlmChain::new(
            provider,
            PromptTemplate::new("hi").unwrap(),
            GenerationOptions::default(),
        );
        let err = chain.predict(&Inputs::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }

    #[tokio::test]
    async fn prompt_errors_are_not_generation_errors() {
        let provider = Arc::new(ScriptedProvider::new(["unused"]));
        let chain = LlmChain::new(
            provider.clone(),
            PromptTemplate::new("{input}").unwrap(),
            GenerationOptions::default(),
        );
        let err = chain.predict(&Inputs::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Prompt(_)));
        assert_eq!(provider.call_count(), 0);
    }
}
