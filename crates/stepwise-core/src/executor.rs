//! Executor
//!
//! Drives an [`Agent`] until it finishes or a budget runs out.
//!
//! ```text
//!            ┌──────────── plan ────────────┐
//!            ▼                              │
//!   Running ──► Finish ──────────────────►  Finished
//!      │  └──► Actions ─► tools ─► steps ───┘
//!      └── budget exhausted ─► stopped response ─► StoppedByLimit
//! ```
//!
//! Run state (iterations, start time, steps) lives on the executor's own
//! stack for the duration of one call and is never shared.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{Agent, EarlyStoppingPolicy};
use crate::callbacks::{CallbackHandler, Callbacks, ToolLoggingContext};
use crate::decision::{AgentFinish, Decision, Inputs, Outputs, Step};
use crate::error::{AgentError, Result};
use crate::memory::Memory;
use crate::tool::{Tool, ToolRegistry};

/// Output key carrying the run's steps when requested
pub const INTERMEDIATE_STEPS_KEY: &str = "intermediate_steps";

pub const ENV_MAX_ITERATIONS: &str = "STEPWISE_MAX_ITERATIONS";
pub const ENV_MAX_EXECUTION_TIME: &str = "STEPWISE_MAX_EXECUTION_TIME";
pub const ENV_EARLY_STOPPING: &str = "STEPWISE_EARLY_STOPPING";
pub const ENV_RETURN_INTERMEDIATE_STEPS: &str = "STEPWISE_RETURN_INTERMEDIATE_STEPS";

/// Run budget and output options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Loop passes before stopping (0 = unlimited)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Wall-clock budget in seconds (0 = unlimited)
    #[serde(default)]
    pub max_execution_time: f64,

    /// How a budget-exhausted run produces its answer
    #[serde(default)]
    pub early_stopping: EarlyStoppingPolicy,

    /// Include the step history under `intermediate_steps`
    #[serde(default)]
    pub return_intermediate_steps: bool,
}

const fn default_max_iterations() -> usize {
    15
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_time: 0.0,
            early_stopping: EarlyStoppingPolicy::default(),
            return_intermediate_steps: false,
        }
    }
}

impl ExecutorConfig {
    /// Create from `STEPWISE_*` environment variables, defaulting unset ones
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            config.max_iterations = raw.trim().parse().map_err(|_| {
                AgentError::Config(format!("{ENV_MAX_ITERATIONS} must be a non-negative integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_MAX_EXECUTION_TIME) {
            config.max_execution_time = raw
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("{ENV_MAX_EXECUTION_TIME} must be seconds, got '{raw}'")))?;
        }
        if let Some(raw) = lookup(ENV_EARLY_STOPPING) {
            config.early_stopping = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_RETURN_INTERMEDIATE_STEPS) {
            config.return_intermediate_steps = parse_flag(&raw).ok_or_else(|| {
                AgentError::Config(format!("{ENV_RETURN_INTERMEDIATE_STEPS} must be a boolean, got '{raw}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_execution_time.is_finite() || self.max_execution_time < 0.0 {
            return Err(AgentError::Config(format!(
                "max_execution_time must be a non-negative number of seconds, got {}",
                self.max_execution_time
            )));
        }
        Ok(())
    }

    /// Whether another loop pass fits the budget
    pub fn should_continue(&self, iterations: usize, elapsed: Duration) -> bool {
        if self.max_iterations != 0 && iterations >= self.max_iterations {
            return false;
        }
        if self.max_execution_time > 0.0 && elapsed.as_secs_f64() >= self.max_execution_time {
            return false;
        }
        true
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Everything a finished run produced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Final return values, plus `intermediate_steps` when enabled
    pub return_values: Outputs,
    /// Rationale of the terminal finish
    pub log: String,
    pub steps: Vec<Step>,
    /// Loop passes taken
    pub iterations: usize,
    /// True when the budget ended the run rather than the agent
    pub stopped_by_limit: bool,
}

struct RunState {
    iterations: usize,
    started: Instant,
    steps: Vec<Step>,
}

impl RunState {
    fn new() -> Self {
        Self {
            iterations: 0,
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The orchestration loop
pub struct Executor {
    agent: Arc<dyn Agent>,
    tools: Vec<Arc<dyn Tool>>,
    callbacks: Callbacks,
    memory: Option<Arc<dyn Memory>>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn builder(agent: Arc<dyn Agent>) -> ExecutorBuilder {
        ExecutorBuilder::new(agent)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Keys callers must supply (memory-provided keys included)
    pub fn input_keys(&self) -> Vec<String> {
        self.agent.input_keys()
    }

    /// Keys every successful run returns
    pub fn output_keys(&self) -> Vec<String> {
        let mut keys = self.agent.return_values();
        if self.config.return_intermediate_steps {
            keys.push(INTERMEDIATE_STEPS_KEY.to_string());
        }
        keys
    }

    /// Run and return only the return values
    pub async fn run(&self, inputs: Inputs) -> Result<Outputs> {
        Ok(self.execute(inputs).await?.return_values)
    }

    /// Run an agent that takes a single caller-supplied input
    pub async fn ask(&self, question: impl Into<String>) -> Result<Outputs> {
        let memory_keys = self.memory.as_ref().map(|m| m.memory_variables()).unwrap_or_default();
        let keys: Vec<String> = self
            .input_keys()
            .into_iter()
            .filter(|key| !memory_keys.contains(key))
            .collect();

        match keys.as_slice() {
            [key] => {
                let mut inputs = Inputs::new();
                inputs.insert(key.clone(), Value::String(question.into()));
                self.run(inputs).await
            }
            [] => Err(AgentError::Config("agent takes no input to ask with".into())),
            many => Err(AgentError::Config(format!(
                "ask needs exactly one input key, agent takes: {}",
                many.join(", ")
            ))),
        }
    }

    /// Run the loop to completion
    pub async fn execute(&self, inputs: Inputs) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("agent_run", %run_id);
        self.execute_run(run_id, inputs).instrument(span).await
    }

    async fn execute_run(&self, run_id: Uuid, inputs: Inputs) -> Result<RunOutcome> {
        let registry = ToolRegistry::build(self.tools.iter().cloned())?;
        let inputs = self.prepare_inputs(inputs)?;

        tracing::info!(tools = registry.len(), "Agent run started");
        self.callbacks.on_run_start(run_id, &inputs);

        let outcome = match self.drive(run_id, &registry, &inputs).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Agent run failed");
                self.callbacks.on_run_error(run_id, &e);
                return Err(e);
            }
        };

        if let Some(memory) = &self.memory {
            if let Err(e) = memory.save(&inputs, &outcome.finish.return_values) {
                self.callbacks.on_run_error(run_id, &e);
                return Err(e);
            }
        }

        self.callbacks.on_run_finish(run_id, &outcome.finish);
        tracing::info!(
            iterations = outcome.iterations,
            steps = outcome.steps.len(),
            stopped_by_limit = outcome.stopped_by_limit,
            "Agent run finished"
        );

        let mut return_values = outcome.finish.return_values;
        if self.config.return_intermediate_steps {
            return_values.insert(INTERMEDIATE_STEPS_KEY.to_string(), serde_json::to_value(&outcome.steps)?);
        }

        Ok(RunOutcome {
            return_values,
            log: outcome.finish.log,
            steps: outcome.steps,
            iterations: outcome.iterations,
            stopped_by_limit: outcome.stopped_by_limit,
        })
    }

    fn prepare_inputs(&self, mut inputs: Inputs) -> Result<Inputs> {
        if let Some(memory) = &self.memory {
            for (key, value) in memory.load(&inputs)? {
                inputs.entry(key).or_insert(value);
            }
        }

        let missing: Vec<String> = self
            .agent
            .input_keys()
            .into_iter()
            .filter(|key| !inputs.contains_key(key))
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::MissingInputKeys(missing));
        }
        Ok(inputs)
    }

    async fn drive(&self, run_id: Uuid, registry: &ToolRegistry, inputs: &Inputs) -> Result<DrivenRun> {
        let mut state = RunState::new();
        let context = self.agent.tool_logging_context();
        let mut finished = None;

        while self.config.should_continue(state.iterations, state.elapsed()) {
            let next = self
                .take_next_step(run_id, registry, inputs, &mut state, &context)
                .await?;
            state.iterations += 1;
            tracing::debug!(iteration = state.iterations, steps = state.steps.len(), "Loop pass complete");

            if next.is_some() {
                finished = next;
                break;
            }
        }

        let (finish, stopped_by_limit) = match finished {
            Some(finish) => (finish, false),
            None => {
                tracing::warn!(
                    iterations = state.iterations,
                    elapsed_secs = state.elapsed().as_secs_f64(),
                    policy = %self.config.early_stopping,
                    "Run budget exhausted"
                );
                let finish = self
                    .agent
                    .return_stopped_response(self.config.early_stopping, &state.steps, inputs)
                    .await?;
                (finish, true)
            }
        };

        Ok(DrivenRun {
            finish,
            steps: state.steps,
            iterations: state.iterations,
            stopped_by_limit,
        })
    }

    /// One plan call and the dispatch of its actions
    async fn take_next_step(
        &self,
        run_id: Uuid,
        registry: &ToolRegistry,
        inputs: &Inputs,
        state: &mut RunState,
        context: &ToolLoggingContext,
    ) -> Result<Option<AgentFinish>> {
        let decision = self.agent.plan(&state.steps, inputs).await?;
        decision.validate(&self.agent.return_values())?;

        let actions = match decision {
            Decision::Finish { finish } => return Ok(Some(finish)),
            Decision::Actions { actions } => actions,
        };

        for action in actions {
            self.callbacks.on_action_chosen(run_id, &action);

            let tool = registry
                .lookup(&action.tool)
                .ok_or_else(|| AgentError::UnknownTool(action.tool.clone()))?;

            self.callbacks.on_tool_start(run_id, &action);
            let observation = match tool.invoke(&action.tool_input).await {
                Ok(observation) => observation,
                Err(source) => {
                    let err = AgentError::tool_invocation(action.tool.clone(), source);
                    self.callbacks.on_tool_error(run_id, &action.tool, &err);
                    return Err(err);
                }
            };
            self.callbacks.on_tool_end(run_id, &action.tool, &observation, context);

            let returns_directly = tool.returns_directly();
            state.steps.push(Step::new(action, observation.clone()));

            if returns_directly {
                return self.direct_finish(observation).map(Some);
            }
        }

        Ok(None)
    }

    /// Finish built from a return-direct tool's observation
    fn direct_finish(&self, observation: String) -> Result<AgentFinish> {
        match self.agent.return_values().first() {
            Some(key) => Ok(AgentFinish::single(key.clone(), observation.clone(), observation)),
            None => Err(AgentError::Config("agent declares no return values".into())),
        }
    }
}

struct DrivenRun {
    finish: AgentFinish,
    steps: Vec<Step>,
    iterations: usize,
    stopped_by_limit: bool,
}

/// Fluent construction of an [`Executor`]
pub struct ExecutorBuilder {
    agent: Arc<dyn Agent>,
    tools: Vec<Arc<dyn Tool>>,
    callbacks: Callbacks,
    memory: Option<Arc<dyn Memory>>,
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            tools: Vec::new(),
            callbacks: Callbacks::none(),
            memory: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        self.tools.extend(tools);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks.add_handler(handler);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn max_execution_time(mut self, budget: Duration) -> Self {
        self.config.max_execution_time = budget.as_secs_f64();
        self
    }

    pub fn early_stopping(mut self, policy: EarlyStoppingPolicy) -> Self {
        self.config.early_stopping = policy;
        self
    }

    pub fn return_intermediate_steps(mut self, enabled: bool) -> Self {
        self.config.return_intermediate_steps = enabled;
        self
    }

    /// Validate the configuration and tool names
    pub fn build(self) -> Result<Executor> {
        self.config.validate()?;
        ToolRegistry::build(self.tools.iter().cloned())?;

        Ok(Executor {
            agent: self.agent,
            tools: self.tools,
            callbacks: self.callbacks,
            memory: self.memory,
            config: self.config,
        })
    }
}
