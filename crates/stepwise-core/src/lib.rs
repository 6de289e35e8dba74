//! # stepwise-core
//!
//! Agent decision loop: an agent picks the next step, the executor runs the
//! chosen tools and feeds observations back until the agent finishes or the
//! run budget is spent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Executor                            │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │    Agent    │   │ ToolRegistry │   │    Callbacks     │   │
//! │  │ (plan once) │──▶│  (dispatch)  │──▶│ (notifications)  │   │
//! │  └──────┬──────┘   └──────────────┘   └──────────────────┘   │
//! │         │                                                    │
//! │  ┌──────▼──────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ Scratchpad  │   │  Predictor   │   │  OutputParser    │   │
//! │  │  Builder    │   │ (LlmChain)   │   │   (grammar)      │   │
//! │  └─────────────┘   └──────────────┘   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets any backend drive an agent without changing
//! agent or executor logic.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stepwise_core::{AgentKind, CalculatorTool, Executor, LlmAgent, Tool, ToolRegistry};
//!
//! let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CalculatorTool)];
//! let registry = ToolRegistry::build(tools.clone())?;
//! let agent = LlmAgent::from_llm_and_tools(AgentKind::ZeroShot, provider, &registry, Default::default())?;
//! let executor = Executor::builder(Arc::new(agent)).tools(tools).build()?;
//! let outputs = executor.ask("What is 2 + 2?").await?;
//! ```

pub mod agent;
pub mod callbacks;
pub mod decision;
pub mod error;
pub mod executor;
pub mod memory;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod scratchpad;
pub mod tool;

pub use agent::{Agent, AgentKind, EarlyStoppingPolicy, LlmAgent};
pub use callbacks::{
    BroadcastHandler, CallbackEvent, CallbackHandler, Callbacks, RecordingHandler, ToolLoggingContext,
    TracingHandler,
};
pub use decision::{AgentAction, AgentFinish, Decision, Inputs, Outputs, Step, ToolInput};
pub use error::{AgentError, Result, ToolError};
pub use executor::{Executor, ExecutorBuilder, ExecutorConfig, RunOutcome};
pub use memory::{BufferMemory, Memory};
pub use parser::{
    ChatOutputParser, ConversationalOutputParser, JsonToolParser, OutputParser, ReactOutputParser,
};
pub use prompt::PromptTemplate;
pub use provider::{GenerationOptions, LlmChain, LlmProvider, Predictor, ScriptedProvider};
pub use scratchpad::ScratchpadBuilder;
pub use tool::{CalculatorTool, DateTimeTool, FnTool, Tool, ToolRegistry};
