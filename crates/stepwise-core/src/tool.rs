//! Tool System
//!
//! Tools are the executor's only way to act. Each run builds an immutable
//! registry from the caller's tool list; lookups never mutate it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::decision::ToolInput;
use crate::error::{AgentError, Result, ToolError};

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to select this tool
    fn name(&self) -> &str;

    /// Human-readable description (shown to the model)
    fn description(&self) -> &str;

    /// When true, the tool's observation becomes the run's final answer
    fn returns_directly(&self) -> bool {
        false
    }

    /// Execute the tool
    async fn invoke(&self, input: &ToolInput) -> std::result::Result<String, ToolError>;
}

type ToolFn = dyn Fn(&ToolInput) -> std::result::Result<String, ToolError> + Send + Sync;

/// Tool backed by a plain closure
pub struct FnTool {
    name: String,
    description: String,
    return_direct: bool,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolInput) -> std::result::Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            return_direct: false,
            func: Box::new(func),
        }
    }

    /// Mark the tool's output as the run's final answer
    pub fn with_return_direct(mut self, return_direct: bool) -> Self {
        self.return_direct = return_direct;
        self
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("return_direct", &self.return_direct)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn returns_directly(&self) -> bool {
        self.return_direct
    }

    async fn invoke(&self, input: &ToolInput) -> std::result::Result<String, ToolError> {
        (self.func)(input)
    }
}

/// Immutable name -> tool lookup, built once per run
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Build a registry, rejecting duplicate names
    pub fn build<I>(tools: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        let mut registry = Self::default();
        for tool in tools {
            let name = tool.name().to_string();
            if registry.tools.contains_key(&name) {
                return Err(AgentError::DuplicateTool(name));
            }
            registry.order.push(name.clone());
            registry.tools.insert(name, tool);
        }
        Ok(registry)
    }

    /// Get a tool by name
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `name: description` line per tool, for prompt construction
    pub fn describe(&self) -> String {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| format!("{}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.order).finish()
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Input is the format: 'iso', 'human', or 'unix'."
    }

    async fn invoke(&self, input: &ToolInput) -> std::result::Result<String, ToolError> {
        let format = match input {
            ToolInput::Text(text) => text.trim().to_string(),
            ToolInput::Structured(_) => input
                .get("format")
                .and_then(|v| v.as_str())
                .unwrap_or("human")
                .to_string(),
        };

        let now = chrono::Utc::now();

        Ok(match format.as_str() {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        })
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as '2 + 2' or '(3 + 4) * 2 ^ 3'."
    }

    async fn invoke(&self, input: &ToolInput) -> std::result::Result<String, ToolError> {
        let expr = match input {
            ToolInput::Text(text) => text.as_str(),
            ToolInput::Structured(_) => input
                .get("expression")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidInput("missing expression".into()))?,
        };

        evaluate_expression(expr)
            .map(format_number)
            .map_err(ToolError::ExecutionFailed)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Recursive-descent-by-splitting evaluator: `+ - * / ^` and parentheses
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let expr = expr.replace(' ', "");
    if expr.is_empty() {
        return Err("empty expression".into());
    }

    // Innermost parentheses first
    if let Some(start) = expr.rfind('(') {
        let Some(end) = expr[start..].find(')') else {
            return Err("unbalanced parentheses".into());
        };
        let close = start + end;
        let is_operand = |c: u8| c.is_ascii_digit() || c == b'.';
        let bytes = expr.as_bytes();
        // Juxtaposition is not multiplication
        if (start > 0 && (is_operand(bytes[start - 1]) || bytes[start - 1] == b')'))
            || bytes.get(close + 1).is_some_and(|&c| is_operand(c) || c == b'(')
        {
            return Err("missing operator next to parentheses".into());
        }
        let inner = evaluate_expression(&expr[start + 1..close])?;
        let rewritten = format!("{}{}{}", &expr[..start], inner, &expr[start + end + 1..]);
        return evaluate_expression(&rewritten);
    }
    if expr.contains(')') {
        return Err("unbalanced parentheses".into());
    }

    let bytes = expr.as_bytes();

    // Addition/subtraction bind loosest, so split on the last one
    for i in (1..bytes.len()).rev() {
        let c = bytes[i];
        if (c == b'+' || c == b'-') && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.') {
            let left = evaluate_expression(&expr[..i])?;
            let right = evaluate_expression(&expr[i + 1..])?;
            return Ok(if c == b'+' { left + right } else { left - right });
        }
    }

    for i in (0..bytes.len()).rev() {
        let c = bytes[i];
        if c == b'*' || c == b'/' {
            let left = evaluate_expression(&expr[..i])?;
            let right = evaluate_expression(&expr[i + 1..])?;
            if c == b'/' && right == 0.0 {
                return Err("division by zero".into());
            }
            return Ok(if c == b'*' { left * right } else { left / right });
        }
    }

    if let Some(i) = expr.find('^') {
        let left = evaluate_expression(&expr[..i])?;
        let right = evaluate_expression(&expr[i + 1..])?;
        return Ok(left.powf(right));
    }

    expr.parse::<f64>()
        .map_err(|e| format!("cannot parse '{expr}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, "echoes input", |input: &ToolInput| Ok(input.to_string())))
    }

    #[test]
    fn test_calculator() {
        assert!((evaluate_expression("2 + 2").unwrap() - 4.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("10 * 5").unwrap() - 50.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("2 ^ 8").unwrap() - 256.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("(1 - 3) * 2").unwrap() + 4.0).abs() < f64::EPSILON);
        assert!(evaluate_expression("1 / 0").is_err());
        assert!(evaluate_expression("(1 + 2").is_err());
        assert!(evaluate_expression("(2)(3)").is_err());
        assert!(evaluate_expression("2(3)").is_err());
        assert!(evaluate_expression("(1+2)3").is_err());
        assert!((evaluate_expression("-(2) * (3)").unwrap() + 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn calculator_formats_integral_results() {
        let out = CalculatorTool.invoke(&ToolInput::from("2+2")).await.unwrap();
        assert_eq!(out, "4");
        let out = CalculatorTool.invoke(&ToolInput::from("7 / 2")).await.unwrap();
        assert_eq!(out, "3.5");
    }

    #[tokio::test]
    async fn calculator_reports_bad_input() {
        let err = CalculatorTool.invoke(&ToolInput::from("two plus two")).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));

        let err = CalculatorTool
            .invoke(&ToolInput::Structured(serde_json::Map::new()))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::InvalidInput("missing expression".into()));

        let err = CalculatorTool.invoke(&ToolInput::from("(2)(3)")).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::ExecutionFailed("missing operator next to parentheses".into())
        );
    }

    #[tokio::test]
    async fn datetime_unix_is_numeric() {
        let out = DateTimeTool.invoke(&ToolInput::from("unix")).await.unwrap();
        assert!(out.parse::<i64>().is_ok());
    }

    #[test]
    fn test_tool_registry() {
        let registry = ToolRegistry::build([
            Arc::new(DateTimeTool) as Arc<dyn Tool>,
            Arc::new(CalculatorTool) as Arc<dyn Tool>,
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["datetime", "calculator"]);
        assert!(registry.lookup("calculator").is_some());
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn duplicate_names_fail_construction() {
        let err = ToolRegistry::build([echo("search"), echo("search")]).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(ref name) if name == "search"));
    }

    #[test]
    fn lookup_is_idempotent() {
        let registry = ToolRegistry::build([echo("search")]).unwrap();
        let first = registry.lookup("search").unwrap();
        let second = registry.lookup("search").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.lookup("weather").is_none());
        assert!(registry.lookup("weather").is_none());
    }

    #[test]
    fn describe_lists_tools_in_order() {
        let registry = ToolRegistry::build([echo("b"), echo("a")]).unwrap();
        assert_eq!(registry.describe(), "b: echoes input\na: echoes input");
    }

    #[tokio::test]
    async fn fn_tool_flags_return_direct() {
        let tool = FnTool::new("final", "", |_: &ToolInput| Ok("done".into())).with_return_direct(true);
        assert!(tool.returns_directly());
        assert_eq!(tool.invoke(&ToolInput::from("")).await.unwrap(), "done");
    }
}
