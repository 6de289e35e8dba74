//! Offline walk-through of the executor
//!
//! Replays a canned ReAct transcript so the loop can be watched without a
//! model server. Set `RUST_LOG=debug` for per-iteration detail and the
//! `STEPWISE_*` variables to change the run budget.

use std::sync::Arc;

use stepwise_core::{
    AgentKind, CalculatorTool, DateTimeTool, Executor, ExecutorConfig, GenerationOptions, LlmAgent,
    ScriptedProvider, Tool, ToolRegistry, TracingHandler,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const TRANSCRIPT: [&str; 3] = [
    " I should work out the product first.\nAction: calculator\nAction Input: (12 + 8) * 3",
    " Now I need the date for the report.\nAction: datetime\nAction Input: iso",
    " I now know the final answer.\nFinal Answer: (12 + 8) * 3 is 60.",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ExecutorConfig::from_env()?;
    tracing::info!(
        max_iterations = config.max_iterations,
        max_execution_time = config.max_execution_time,
        early_stopping = %config.early_stopping,
        "Executor configured"
    );

    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CalculatorTool), Arc::new(DateTimeTool)];
    let registry = ToolRegistry::build(tools.clone())?;

    let provider = Arc::new(ScriptedProvider::new(TRANSCRIPT));
    let agent = LlmAgent::from_llm_and_tools(
        AgentKind::ZeroShot,
        provider.clone(),
        &registry,
        GenerationOptions::default(),
    )?;

    let executor = Executor::builder(Arc::new(agent))
        .tools(tools)
        .handler(Arc::new(TracingHandler))
        .config(config)
        .build()?;

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What is (12 + 8) * 3, and what is today's date?".into());
    let mut inputs = stepwise_core::Inputs::new();
    inputs.insert("input".into(), serde_json::Value::String(question));

    let outcome = executor.execute(inputs).await?;
    tracing::info!(
        iterations = outcome.iterations,
        backend_calls = provider.call_count(),
        stopped_by_limit = outcome.stopped_by_limit,
        "Done"
    );

    println!("{}", serde_json::to_string_pretty(&outcome.return_values)?);
    Ok(())
}
