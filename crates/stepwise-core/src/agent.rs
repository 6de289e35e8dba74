//! Agents
//!
//! An agent turns `(history, inputs)` into exactly one [`Decision`] per
//! call and holds no run state of its own; the executor owns the history.
//! Variants (zero-shot, conversational, chat) are configurations of [`LlmAgent`],
//! not subtypes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::callbacks::ToolLoggingContext;
use crate::decision::{AgentFinish, Decision, Inputs, Step};
use crate::error::{AgentError, Result};
use crate::parser::{ChatOutputParser, ConversationalOutputParser, OUTPUT_KEY, OutputParser, ReactOutputParser};
use crate::prompt::{PromptTemplate, escape_braces};
use crate::provider::{GenerationOptions, LlmChain, LlmProvider, Predictor, STOP_KEY};
use crate::scratchpad::ScratchpadBuilder;
use crate::tool::ToolRegistry;

/// Input key the rendered scratchpad is injected under
pub const SCRATCHPAD_KEY: &str = "agent_scratchpad";

/// Return value used when a run is force-stopped
pub const STOPPED_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

const FINAL_ANSWER_NUDGE: &str = "\n\nI now need to return a final answer based on the previous steps:";

/// How the executor ends a run that ran out of budget
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EarlyStoppingPolicy {
    /// Return a canned message without calling the backend again
    #[default]
    Force,
    /// Ask the backend once more for a final answer
    Generate,
}

impl FromStr for EarlyStoppingPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "force" => Ok(Self::Force),
            "generate" => Ok(Self::Generate),
            other => Err(AgentError::UnsupportedPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for EarlyStoppingPolicy {
    type Error = AgentError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EarlyStoppingPolicy> for String {
    fn from(policy: EarlyStoppingPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for EarlyStoppingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Force => write!(f, "force"),
            Self::Generate => write!(f, "generate"),
        }
    }
}

/// The decision-making capability the executor drives
#[async_trait]
pub trait Agent: Send + Sync {
    /// Caller-supplied keys this agent needs
    fn input_keys(&self) -> Vec<String>;

    /// Keys every finish must carry
    fn return_values(&self) -> Vec<String> {
        vec![OUTPUT_KEY.to_string()]
    }

    /// Produce the next decision from history and inputs
    async fn plan(&self, steps: &[Step], inputs: &Inputs) -> Result<Decision>;

    /// Terminal finish for a run stopped by its budget
    ///
    /// The default supports only [`EarlyStoppingPolicy::Force`].
    async fn return_stopped_response(
        &self,
        policy: EarlyStoppingPolicy,
        _steps: &[Step],
        _inputs: &Inputs,
    ) -> Result<AgentFinish> {
        match policy {
            EarlyStoppingPolicy::Force => Ok(forced_finish(&self.return_values())),
            EarlyStoppingPolicy::Generate => Err(AgentError::UnsupportedPolicy(policy.to_string())),
        }
    }

    /// Prefixes for instrumentation only
    fn tool_logging_context(&self) -> ToolLoggingContext {
        ToolLoggingContext::default()
    }
}

/// Canned finish carrying [`STOPPED_MESSAGE`] under every return key
pub fn forced_finish(return_values: &[String]) -> AgentFinish {
    let values = return_values
        .iter()
        .map(|key| (key.clone(), Value::String(STOPPED_MESSAGE.to_string())))
        .collect();
    AgentFinish::new(values, STOPPED_MESSAGE)
}

/// Prompt flavour and prefixes of an [`LlmAgent`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Single-question ReAct
    #[default]
    ZeroShot,
    /// ReAct with a `chat_history` input and `AI:` replies
    Conversational,
    /// ReAct for chat models: one fenced JSON action blob per turn
    Chat,
}

impl AgentKind {
    pub const fn observation_prefix(self) -> &'static str {
        "Observation: "
    }

    pub const fn llm_prefix(self) -> &'static str {
        "Thought:"
    }

    pub fn default_parser(self) -> Arc<dyn OutputParser> {
        match self {
            Self::ZeroShot => Arc::new(ReactOutputParser),
            Self::Conversational => Arc::new(ConversationalOutputParser::default()),
            Self::Chat => Arc::new(ChatOutputParser),
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::ZeroShot | Self::Chat => {
                "Answer the following questions as best you can. You have access to the following tools:"
            }
            Self::Conversational => {
                "Assistant is a large language model. Assistant is designed to be able to assist with \
                 a wide range of tasks, from answering simple questions to providing in-depth \
                 explanations and discussions on a wide range of topics.\n\n\
                 TOOLS:\n------\n\nAssistant has access to the following tools:"
            }
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::ZeroShot => "Begin!\n\nQuestion: {input}\nThought:{agent_scratchpad}",
            Self::Chat => {
                "Begin! Reminder to always use the exact characters `Final Answer` when responding.\n\n\
                 Question: {input}\nThought:{agent_scratchpad}"
            }
            Self::Conversational => {
                "Begin!\n\nPrevious conversation history:\n{chat_history}\n\nNew input: {input}\n{agent_scratchpad}"
            }
        }
    }

    /// Build the default prompt for the given tools and grammar
    pub fn create_prompt(self, tools: &ToolRegistry, parser: &dyn OutputParser) -> Result<PromptTemplate> {
        let tool_names = tools.names().join(", ");
        let template = format!(
            "{}\n\n{}\n\n{}\n\n{}",
            self.prefix(),
            escape_braces(&tools.describe()),
            escape_braces(&parser.format_instructions(&tool_names)),
            self.suffix()
        );
        PromptTemplate::new(template)
    }
}

/// Agent that plans by prompting a [`Predictor`] and parsing its text
pub struct LlmAgent {
    kind: AgentKind,
    predictor: Arc<dyn Predictor>,
    parser: Arc<dyn OutputParser>,
    scratchpad: ScratchpadBuilder,
    output_keys: Vec<String>,
}

impl LlmAgent {
    pub fn new(kind: AgentKind, predictor: Arc<dyn Predictor>, parser: Arc<dyn OutputParser>) -> Self {
        Self {
            kind,
            predictor,
            parser,
            scratchpad: ScratchpadBuilder::default(),
            output_keys: vec![OUTPUT_KEY.to_string()],
        }
    }

    /// Wire an agent of `kind` to a provider, prompting with `tools`
    pub fn from_llm_and_tools(
        kind: AgentKind,
        provider: Arc<dyn LlmProvider>,
        tools: &ToolRegistry,
        options: GenerationOptions,
    ) -> Result<Self> {
        if tools.is_empty() {
            return Err(AgentError::Config("an agent needs at least one tool".into()));
        }
        let parser = kind.default_parser();
        let prompt = kind.create_prompt(tools, parser.as_ref())?;
        let chain = LlmChain::new(provider, prompt, options);
        Ok(Self::new(kind, Arc::new(chain), parser))
    }

    pub fn with_scratchpad(mut self, scratchpad: ScratchpadBuilder) -> Self {
        self.scratchpad = scratchpad;
        self
    }

    pub fn with_output_keys(mut self, keys: Vec<String>) -> Self {
        self.output_keys = keys;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Stop sequences that halt the model before it invents an observation
    pub fn stop(&self) -> Vec<String> {
        let prefix = self.kind.observation_prefix().trim();
        vec![format!("\n{prefix}"), format!("\n\t{prefix}")]
    }

    fn full_inputs(&self, steps: &[Step], inputs: &Inputs, nudge: &str) -> Inputs {
        let mut thoughts = self
            .scratchpad
            .render(steps, self.kind.observation_prefix(), self.kind.llm_prefix());
        thoughts.push_str(nudge);

        let mut full = inputs.clone();
        full.insert(SCRATCHPAD_KEY.to_string(), Value::String(thoughts));
        full.insert(
            STOP_KEY.to_string(),
            Value::Array(self.stop().into_iter().map(Value::String).collect()),
        );
        full
    }

    async fn predict(&self, inputs: &Inputs) -> Result<String> {
        self.predictor.predict(inputs).await.map_err(|e| match e {
            AgentError::Generation(_) | AgentError::Prompt(_) => e,
            other => AgentError::Generation(other.to_string()),
        })
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn input_keys(&self) -> Vec<String> {
        self.predictor
            .input_keys()
            .into_iter()
            .filter(|key| key != SCRATCHPAD_KEY && key != STOP_KEY)
            .collect()
    }

    fn return_values(&self) -> Vec<String> {
        self.output_keys.clone()
    }

    async fn plan(&self, steps: &[Step], inputs: &Inputs) -> Result<Decision> {
        let full = self.full_inputs(steps, inputs, "");
        let text = self.predict(&full).await?;
        let decision = self.parser.parse(&text)?;
        decision.validate(&self.output_keys)?;

        tracing::debug!(steps = steps.len(), finish = decision.is_finish(), "Planned next step");
        Ok(decision)
    }

    async fn return_stopped_response(
        &self,
        policy: EarlyStoppingPolicy,
        steps: &[Step],
        inputs: &Inputs,
    ) -> Result<AgentFinish> {
        match policy {
            EarlyStoppingPolicy::Force => Ok(forced_finish(&self.output_keys)),
            EarlyStoppingPolicy::Generate => {
                let full = self.full_inputs(steps, inputs, FINAL_ANSWER_NUDGE);
                let text = self.predict(&full).await?;

                match self.parser.parse(&text) {
                    Ok(Decision::Finish { finish }) if finish.missing_keys(&self.output_keys).is_empty() => {
                        Ok(finish)
                    }
                    parsed => match self.output_keys.as_slice() {
                        [key] => Ok(AgentFinish::single(key.clone(), text.clone(), text)),
                        keys => Err(AgentError::Parse(format!(
                            "cannot map unparsed final generation onto return keys [{}]: {}",
                            keys.join(", "),
                            parsed.err().map_or_else(|| "not a finish".to_string(), |e| e.to_string())
                        ))),
                    },
                }
            }
        }
    }

    fn tool_logging_context(&self) -> ToolLoggingContext {
        ToolLoggingContext {
            observation_prefix: self.kind.observation_prefix().to_string(),
            llm_prefix: self.kind.llm_prefix().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{AgentAction, ToolInput};
    use crate::parser::JsonToolParser;
    use crate::provider::ScriptedProvider;
    use crate::tool::{CalculatorTool, Tool};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::build([Arc::new(CalculatorTool) as Arc<dyn Tool>]).unwrap()
    }

    fn zero_shot(provider: Arc<ScriptedProvider>) -> LlmAgent {
        LlmAgent::from_llm_and_tools(AgentKind::ZeroShot, provider, &registry(), GenerationOptions::default())
            .unwrap()
    }

    fn question(text: &str) -> Inputs {
        let mut inputs = Inputs::new();
        inputs.insert("input".into(), json!(text));
        inputs
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("force".parse::<EarlyStoppingPolicy>().unwrap(), EarlyStoppingPolicy::Force);
        assert_eq!(" Generate ".parse::<EarlyStoppingPolicy>().unwrap(), EarlyStoppingPolicy::Generate);
        let err = "retry".parse::<EarlyStoppingPolicy>().unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedPolicy(ref p) if p == "retry"));

        let policy: EarlyStoppingPolicy = serde_json::from_value(json!("generate")).unwrap();
        assert_eq!(policy, EarlyStoppingPolicy::Generate);
        assert!(serde_json::from_value::<EarlyStoppingPolicy>(json!("never")).is_err());
    }

    #[test]
    fn input_keys_exclude_injected_keys() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(Vec::<String>::new())));
        assert_eq!(agent.input_keys(), vec!["input".to_string()]);

        let conversational = LlmAgent::from_llm_and_tools(
            AgentKind::Conversational,
            Arc::new(ScriptedProvider::new(Vec::<String>::new())),
            &registry(),
            GenerationOptions::default(),
        )
        .unwrap();
        assert_eq!(
            conversational.input_keys(),
            vec!["chat_history".to_string(), "input".to_string()]
        );
    }

    #[test]
    fn agent_requires_tools() {
        let err = LlmAgent::from_llm_and_tools(
            AgentKind::ZeroShot,
            Arc::new(ScriptedProvider::new(Vec::<String>::new())),
            &ToolRegistry::default(),
            GenerationOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn prompt_lists_tools() {
        let prompt = AgentKind::ZeroShot
            .create_prompt(&registry(), &ReactOutputParser)
            .unwrap();
        assert!(prompt.template().contains("calculator: Evaluate"));
        assert!(prompt.template().contains("one of [calculator]"));

        let json_prompt = AgentKind::ZeroShot.create_prompt(&registry(), &JsonToolParser).unwrap();
        assert_eq!(json_prompt.input_variables(), ["input", "agent_scratchpad"]);
    }

    #[tokio::test]
    async fn plan_renders_scratchpad_and_stop() {
        let provider = Arc::new(ScriptedProvider::new(["Thought: done\nFinal Answer: 4"]));
        let agent = zero_shot(provider.clone());
        let steps = vec![Step::new(
            AgentAction::new("calculator", "2+2", " I should add.\nAction: calculator\nAction Input: 2+2"),
            "4",
        )];

        let decision = agent.plan(&steps, &question("What is 2+2?")).await.unwrap();
        assert!(decision.is_finish());

        let call = &provider.calls()[0];
        assert!(call.prompt.ends_with(
            "Question: What is 2+2?\nThought: I should add.\nAction: calculator\nAction Input: 2+2\nObservation: 4\nThought:"
        ));
        assert_eq!(call.stop_sequences, vec!["\nObservation:".to_string(), "\n\tObservation:".to_string()]);
    }

    fn chat(provider: Arc<ScriptedProvider>) -> LlmAgent {
        LlmAgent::from_llm_and_tools(AgentKind::Chat, provider, &registry(), GenerationOptions::default()).unwrap()
    }

    #[test]
    fn chat_prompt_teaches_json_blobs() {
        let prompt = AgentKind::Chat.create_prompt(&registry(), &ChatOutputParser).unwrap();
        assert_eq!(prompt.input_variables(), ["input", "agent_scratchpad"]);
        assert!(prompt.template().contains("`action_input` key"));
        assert!(prompt.template().contains("field are: calculator"));
        assert!(prompt.template().contains("exact characters `Final Answer`"));

        let kind: AgentKind = serde_json::from_value(json!("chat")).unwrap();
        assert_eq!(kind, AgentKind::Chat);
    }

    #[tokio::test]
    async fn chat_plan_returns_action_then_finish() {
        let provider = Arc::new(ScriptedProvider::new([
            "Thought: add them\nAction:\n```json\n{\"action\": \"calculator\", \"action_input\": \"2+2\"}\n```",
            "Action:\n```json\n{\"action\": \"Final Answer\", \"action_input\": \"4\"}\n```",
        ]));
        let agent = chat(provider.clone());

        let decision = agent.plan(&[], &question("What is 2+2?")).await.unwrap();
        let Decision::Actions { actions } = decision else {
            panic!("expected an action");
        };
        assert_eq!(actions[0].tool, "calculator");
        assert_eq!(actions[0].tool_input, ToolInput::from("2+2"));

        let steps = vec![Step::new(actions[0].clone(), "4")];
        let decision = agent.plan(&steps, &question("What is 2+2?")).await.unwrap();
        let Decision::Finish { finish } = decision else {
            panic!("expected a finish");
        };
        assert_eq!(finish.return_values["output"], json!("4"));
        assert!(provider.calls()[1].prompt.contains("```\nObservation: 4\nThought:"));
    }

    #[tokio::test]
    async fn plan_surfaces_parse_errors() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(["no idea"])));
        let err = agent.plan(&[], &question("?")).await.unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn plan_surfaces_generation_errors() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(Vec::<String>::new())));
        let err = agent.plan(&[], &question("?")).await.unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }

    #[tokio::test]
    async fn force_stop_does_not_call_backend() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let agent = zero_shot(provider.clone());
        let finish = agent
            .return_stopped_response(EarlyStoppingPolicy::Force, &[], &question("?"))
            .await
            .unwrap();
        assert_eq!(finish.return_values["output"], json!(STOPPED_MESSAGE));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn generate_stop_uses_parsed_finish() {
        let provider = Arc::new(ScriptedProvider::new(["Final Answer: 42"]));
        let agent = zero_shot(provider.clone());
        let finish = agent
            .return_stopped_response(EarlyStoppingPolicy::Generate, &[], &question("?"))
            .await
            .unwrap();
        assert_eq!(finish.return_values["output"], json!("42"));
        assert!(provider.calls()[0].prompt.ends_with(FINAL_ANSWER_NUDGE));
    }

    #[tokio::test]
    async fn generate_stop_wraps_unparsed_text() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(["Probably 42."])));
        let finish = agent
            .return_stopped_response(EarlyStoppingPolicy::Generate, &[], &question("?"))
            .await
            .unwrap();
        assert_eq!(finish.return_values["output"], json!("Probably 42."));
        assert_eq!(finish.log, "Probably 42.");
    }

    #[tokio::test]
    async fn generate_stop_fails_for_multi_output_agents() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(["Probably 42."])))
            .with_output_keys(vec!["output".into(), "sources".into()]);
        let err = agent
            .return_stopped_response(EarlyStoppingPolicy::Generate, &[], &question("?"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[test]
    fn logging_context_exposes_prefixes() {
        let agent = zero_shot(Arc::new(ScriptedProvider::new(Vec::<String>::new())));
        let ctx = agent.tool_logging_context();
        assert_eq!(ctx.observation_prefix, "Observation: ");
        assert_eq!(ctx.llm_prefix, "Thought:");
    }
}
