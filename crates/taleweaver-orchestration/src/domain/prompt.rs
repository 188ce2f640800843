//! Prompt rendering seam.
//!
//! Templates are owned by whoever implements [`PromptRenderer`]; the engine
//! only supplies the context and forwards the result untouched.

use taleweaver_core::model::Phase;
use uuid::Uuid;

use super::roster::AgentProfile;

/// Everything a renderer may draw on for one agent call.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub session_id: Uuid,
    pub turn_number: u64,
    pub phase: Phase,
    pub agent: &'a AgentProfile,
    pub setting: Option<&'a str>,
    pub scenario: Option<&'a str>,
    /// Content produced earlier in this turn, oldest first.
    pub history: &'a [String],
}

/// Turns a [`PromptContext`] into the opaque prompt string sent to the
/// generation service.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, context: &PromptContext<'_>) -> String;
}

/// Line-oriented renderer used when no template engine is plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPromptRenderer;

impl PromptRenderer for PlainPromptRenderer {
    fn render(&self, context: &PromptContext<'_>) -> String {
        let mut lines = vec![format!(
            "You are {} ({}). Turn {}, phase {}.",
            context.agent.agent_id, context.agent.role, context.turn_number, context.phase
        )];
        if let Some(setting) = context.setting {
            lines.push(format!("Setting: {setting}"));
        }
        if let Some(scenario) = context.scenario {
            lines.push(format!("Scenario: {scenario}"));
        }
        if !context.history.is_empty() {
            lines.push("So far this turn:".to_owned());
            lines.extend(context.history.iter().map(|entry| format!("- {entry}")));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taleweaver_core::model::AgentRole;

    #[test]
    fn test_plain_renderer_includes_agent_phase_and_history() {
        // Arrange
        let agent = AgentProfile {
            agent_id: "mira".to_owned(),
            role: AgentRole::Persona,
        };
        let history = vec!["The gate is barred.".to_owned()];
        let context = PromptContext {
            session_id: Uuid::new_v4(),
            turn_number: 3,
            phase: Phase::Execution,
            agent: &agent,
            setting: Some("A walled river town"),
            scenario: None,
            history: &history,
        };

        // Act
        let prompt = PlainPromptRenderer.render(&context);

        // Assert
        assert!(prompt.starts_with("You are mira (persona). Turn 3, phase execution."));
        assert!(prompt.contains("Setting: A walled river town"));
        assert!(!prompt.contains("Scenario:"));
        assert!(prompt.ends_with("- The gate is barred."));
    }
}
