//! Scratchpad rendering
//!
//! Replays past steps into the transcript the model continues from.

use crate::decision::Step;

/// Renders history into scratchpad text
///
/// With a window set, only the last `window` steps are replayed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScratchpadBuilder {
    window: Option<usize>,
}

impl ScratchpadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the last `steps` steps in the rendered transcript
    pub fn with_window(mut self, steps: usize) -> Self {
        self.window = Some(steps);
        self
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    /// Render steps in order; empty history renders as `""`
    pub fn render(&self, steps: &[Step], observation_prefix: &str, llm_prefix: &str) -> String {
        let visible = match self.window {
            Some(window) if steps.len() > window => &steps[steps.len() - window..],
            _ => steps,
        };

        let mut thoughts = String::new();
        for step in visible {
            thoughts.push_str(&step.action.log);
            thoughts.push('\n');
            thoughts.push_str(observation_prefix);
            thoughts.push_str(&step.observation);
            thoughts.push('\n');
            thoughts.push_str(llm_prefix);
        }
        thoughts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::AgentAction;

    fn step(log: &str, observation: &str) -> Step {
        Step::new(AgentAction::new("search", "q", log), observation)
    }

    #[test]
    fn empty_history_renders_empty() {
        let builder = ScratchpadBuilder::new();
        assert_eq!(builder.render(&[], "Observation: ", "Thought:"), "");
        assert_eq!(builder.render(&[], "", ""), "");
    }

    #[test]
    fn steps_render_in_order() {
        let steps = vec![step("I should search.", "rain"), step(" Search again.", "sun")];
        let text = ScratchpadBuilder::new().render(&steps, "Observation: ", "Thought:");
        assert_eq!(
            text,
            "I should search.\nObservation: rain\nThought: Search again.\nObservation: sun\nThought:"
        );
    }

    #[test]
    fn window_keeps_latest_steps() {
        let steps = vec![step("a", "1"), step("b", "2"), step("c", "3")];
        let text = ScratchpadBuilder::new().with_window(2).render(&steps, "O:", "T:");
        assert_eq!(text, "b\nO:2\nT:c\nO:3\nT:");
    }
}
