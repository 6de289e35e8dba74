//! Prompt Templates
//!
//! `{name}` placeholders are filled from run inputs; `{{` and `}}` emit
//! literal braces.

use serde_json::Value;

use crate::decision::Inputs;
use crate::error::{AgentError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed prompt template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    segments: Vec<Segment>,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    /// Parse a template, discovering its input variables
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        let mut segments = Vec::new();
        let mut input_variables: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(AgentError::Prompt(format!("unclosed placeholder '{{{name}'")));
                            }
                        }
                    }
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        return Err(AgentError::Prompt("empty placeholder '{}'".into()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if !input_variables.contains(&name) {
                        input_variables.push(name.clone());
                    }
                    segments.push(Segment::Variable(name));
                }
                '}' => return Err(AgentError::Prompt("unmatched '}' in template".into())),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            template,
            segments,
            input_variables,
        })
    }

    /// Variables the template needs, in order of first appearance
    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render with the given inputs
    pub fn format(&self, inputs: &Inputs) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = inputs
                        .get(name)
                        .ok_or_else(|| AgentError::Prompt(format!("missing value for '{name}'")))?;
                    match value {
                        Value::String(text) => out.push_str(text),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Escape text so it is taken literally when embedded in a template
pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn discovers_variables_in_order() {
        let prompt = PromptTemplate::new("Q: {input}\n{agent_scratchpad} {input}").unwrap();
        assert_eq!(prompt.input_variables(), ["input", "agent_scratchpad"]);
    }

    #[test]
    fn formats_strings_and_escapes() {
        let prompt = PromptTemplate::new("{{\"a\": {n}}} {name}").unwrap();
        let out = prompt
            .format(&inputs(&[("n", json!(3)), ("name", json!("bob"))]))
            .unwrap();
        assert_eq!(out, "{\"a\": 3} bob");
    }

    #[test]
    fn missing_value_is_an_error() {
        let prompt = PromptTemplate::new("{input}").unwrap();
        assert!(matches!(prompt.format(&Inputs::new()), Err(AgentError::Prompt(_))));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(PromptTemplate::new("{open").is_err());
        assert!(PromptTemplate::new("close}").is_err());
        assert!(PromptTemplate::new("{}").is_err());
    }

    #[test]
    fn escaped_text_round_trips_literally() {
        let text = r#"{"tool": "x"}"#;
        let prompt = PromptTemplate::new(escape_braces(text)).unwrap();
        assert!(prompt.input_variables().is_empty());
        assert_eq!(prompt.format(&Inputs::new()).unwrap(), text);
    }
}
