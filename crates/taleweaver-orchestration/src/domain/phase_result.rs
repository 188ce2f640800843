//! Output of one completed phase.

use serde::{Deserialize, Serialize};
use taleweaver_core::decision::{DecisionKind, DecisionOption};
use taleweaver_core::model::{AgentRole, Phase};

use super::reply::AgentReply;

/// One agent's successful contribution to a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// The contributing agent.
    pub agent_id: String,
    /// The agent's role.
    pub role: AgentRole,
    /// What the agent produced.
    pub reply: AgentReply,
}

/// The aggregated output of a phase whose quorum held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// The phase that produced the output.
    pub phase: Phase,
    /// Successful contributions, in participant order.
    pub contributions: Vec<Contribution>,
}

impl PhaseResult {
    /// Highest tension any agent reported, `0.0` if none did.
    #[must_use]
    pub fn tension(&self) -> f64 {
        self.contributions
            .iter()
            .filter_map(|c| c.reply.tension)
            .fold(0.0, f64::max)
    }

    /// Every surfaced choice, first occurrence of each id wins.
    #[must_use]
    pub fn choices(&self) -> Vec<DecisionOption> {
        let mut choices: Vec<DecisionOption> = Vec::new();
        for option in self.contributions.iter().flat_map(|c| &c.reply.choices) {
            if !choices.iter().any(|existing| existing.id == option.id) {
                choices.push(option.clone());
            }
        }
        choices
    }

    /// Whether any agent flagged an unresolved conflict.
    #[must_use]
    pub fn unresolved_conflict(&self) -> bool {
        self.contributions.iter().any(|c| c.reply.unresolved_conflict)
    }

    /// First decision-kind hint, preferring the director's.
    #[must_use]
    pub fn decision_kind_hint(&self) -> Option<DecisionKind> {
        self.by_director_first().find_map(|c| c.reply.decision_kind)
    }

    /// First question an agent proposed, preferring the director's.
    #[must_use]
    pub fn question_hint(&self) -> Option<&str> {
        self.by_director_first()
            .find_map(|c| c.reply.question.as_deref())
    }

    /// Contents joined in participant order.
    #[must_use]
    pub fn joined_content(&self) -> String {
        self.contributions
            .iter()
            .map(|c| c.reply.content.as_str())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn by_director_first(&self) -> impl Iterator<Item = &Contribution> {
        self.contributions
            .iter()
            .filter(|c| c.role == AgentRole::Director)
            .chain(
                self.contributions
                    .iter()
                    .filter(|c| c.role != AgentRole::Director),
            )
    }
}
