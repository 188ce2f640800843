//! Interpretation of raw agent text.
//!
//! An agent may answer with a JSON object carrying narrative signals, or
//! with plain prose. Prose carries no signals.

use serde::{Deserialize, Serialize};
use taleweaver_core::decision::{DecisionKind, DecisionOption};

/// An agent's reply with any signals it surfaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Narrative content.
    #[serde(default)]
    pub content: String,
    /// Dramatic tension in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tension: Option<f64>,
    /// Choices the agent wants to put to the human.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<DecisionOption>,
    /// Set when the agent leaves a conflict open.
    #[serde(default)]
    pub unresolved_conflict: bool,
    /// Hint for the kind of decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_kind: Option<DecisionKind>,
    /// Question to put to the human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// World events referenced by the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl AgentReply {
    /// Parses generated text. JSON objects are read field by field; anything
    /// else becomes plain content.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('{')
            && let Ok(reply) = serde_json::from_str::<Self>(trimmed)
        {
            return reply.normalized();
        }
        Self {
            content: trimmed.to_owned(),
            ..Self::default()
        }
    }

    fn normalized(mut self) -> Self {
        self.tension = self
            .tension
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, 1.0));
        self.content = self.content.trim().to_owned();
        self
    }
}
