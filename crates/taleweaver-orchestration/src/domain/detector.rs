//! Decision point detection.
//!
//! The detector is a pure function of the phase output: it never touches the
//! store or the bus and returns the same answer for the same input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taleweaver_core::decision::{DecisionKind, DecisionOption, DecisionPoint, Urgency};
use taleweaver_core::model::Phase;

use super::phase_result::PhaseResult;

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Tension above which surfaced choices become a decision.
    pub tension_threshold: f64,
    /// Tension at or above which a decision is `High` urgency.
    pub high_urgency_threshold: f64,
    /// Seconds before an unanswered decision auto-resolves. `None` waits
    /// forever.
    pub decision_timeout_secs: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tension_threshold: 0.7,
            high_urgency_threshold: 0.9,
            decision_timeout_secs: Some(600),
        }
    }
}

/// Input to one detection.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub phase: Phase,
    pub result: &'a PhaseResult,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionPointDetector {
    config: DetectorConfig,
}

impl DecisionPointDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Decides whether the phase output needs a human.
    ///
    /// A decision is raised at the end of `planning` or `execution` when
    /// tension exceeds the threshold and agents surfaced choices, or when an
    /// agent flagged an unresolved conflict.
    #[must_use]
    pub fn detect(&self, context: &TurnContext<'_>) -> Option<DecisionPoint> {
        if !context.phase.may_raise_decision() {
            return None;
        }
        let result = context.result;
        let tension = result.tension();
        let choices = result.choices();
        let conflict = result.unresolved_conflict();
        let tense_choice = tension > self.config.tension_threshold && !choices.is_empty();
        if !tense_choice && !conflict {
            return None;
        }

        let kind = result.decision_kind_hint().unwrap_or(if conflict {
            DecisionKind::ConflictResolution
        } else if context.phase == Phase::Planning {
            DecisionKind::NarrativeBranch
        } else {
            DecisionKind::CharacterAction
        });
        let urgency = if tension >= self.config.high_urgency_threshold {
            Urgency::High
        } else if tension > self.config.tension_threshold {
            Urgency::Medium
        } else {
            Urgency::Low
        };
        let options = if choices.is_empty() {
            conflict_options()
        } else {
            choices
        };
        let prompt = result
            .question_hint()
            .map_or_else(|| default_prompt(kind), str::to_owned);

        let point = DecisionPoint::new(kind, prompt, options, urgency, context.phase).ok()?;
        let expires_at = self
            .config
            .decision_timeout_secs
            .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?))
            .and_then(|timeout| context.now.checked_add_signed(timeout));
        Some(match expires_at {
            Some(at) => point.expiring_at(at),
            None => point,
        })
    }
}

fn conflict_options() -> Vec<DecisionOption> {
    vec![
        DecisionOption::new("let_it_unfold", "Let it unfold")
            .with_description("The characters settle the conflict on their own.")
            .recommended(),
        DecisionOption::new("intervene", "Intervene")
            .with_description("Step in and steer how the conflict ends."),
    ]
}

fn default_prompt(kind: DecisionKind) -> String {
    match kind {
        DecisionKind::NarrativeBranch => "Which way should the story go?",
        DecisionKind::ConflictResolution => "How should this conflict be resolved?",
        DecisionKind::CharacterAction => "What should happen next?",
        DecisionKind::WorldEvent => "How does the world respond?",
    }
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::phase_result::Contribution;
    use crate::domain::reply::AgentReply;
    use chrono::TimeZone;
    use taleweaver_core::model::AgentRole;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn result(phase: Phase, reply: AgentReply) -> PhaseResult {
        PhaseResult {
            phase,
            contributions: vec![Contribution {
                agent_id: "mira".to_owned(),
                role: AgentRole::Persona,
                reply,
            }],
        }
    }

    fn two_choices() -> Vec<DecisionOption> {
        vec![
            DecisionOption::new("a", "Option A"),
            DecisionOption::new("b", "Option B"),
        ]
    }

    #[test]
    fn test_tense_planning_with_choices_raises_branch() {
        // Arrange
        let result = result(
            Phase::Planning,
            AgentReply {
                tension: Some(0.8),
                choices: two_choices(),
                ..AgentReply::default()
            },
        );
        let detector = DecisionPointDetector::default();

        // Act
        let point = detector
            .detect(&TurnContext {
                phase: Phase::Planning,
                result: &result,
                now: now(),
            })
            .unwrap();

        // Assert
        assert_eq!(point.kind(), DecisionKind::NarrativeBranch);
        assert_eq!(point.urgency(), Urgency::Medium);
        assert_eq!(point.options().len(), 2);
        assert_eq!(point.raised_in(), Phase::Planning);
        assert_eq!(point.expires_at(), Some(now() + chrono::Duration::seconds(600)));
    }

    #[test]
    fn test_tension_at_threshold_does_not_raise() {
        let result = result(
            Phase::Planning,
            AgentReply {
                tension: Some(0.7),
                choices: two_choices(),
                ..AgentReply::default()
            },
        );

        let point = DecisionPointDetector::default().detect(&TurnContext {
            phase: Phase::Planning,
            result: &result,
            now: now(),
        });

        assert!(point.is_none());
    }

    #[test]
    fn test_high_tension_without_choices_does_not_raise() {
        let result = result(
            Phase::Execution,
            AgentReply {
                tension: Some(0.95),
                ..AgentReply::default()
            },
        );

        let point = DecisionPointDetector::default().detect(&TurnContext {
            phase: Phase::Execution,
            result: &result,
            now: now(),
        });

        assert!(point.is_none());
    }

    #[test]
    fn test_conflict_without_choices_gets_builtin_options() {
        // Arrange
        let result = result(
            Phase::Execution,
            AgentReply {
                unresolved_conflict: true,
                ..AgentReply::default()
            },
        );

        // Act
        let point = DecisionPointDetector::default()
            .detect(&TurnContext {
                phase: Phase::Execution,
                result: &result,
                now: now(),
            })
            .unwrap();

        // Assert
        assert_eq!(point.kind(), DecisionKind::ConflictResolution);
        assert_eq!(point.urgency(), Urgency::Low);
        assert_eq!(
            point.default_option().map(|o| o.id.as_str()),
            Some("let_it_unfold")
        );
        assert!(point.option("intervene").is_some());
    }

    #[test]
    fn test_very_high_tension_is_high_urgency() {
        let result = result(
            Phase::Execution,
            AgentReply {
                tension: Some(0.95),
                choices: two_choices(),
                ..AgentReply::default()
            },
        );

        let point = DecisionPointDetector::default()
            .detect(&TurnContext {
                phase: Phase::Execution,
                result: &result,
                now: now(),
            })
            .unwrap();

        assert_eq!(point.urgency(), Urgency::High);
        assert_eq!(point.kind(), DecisionKind::CharacterAction);
    }

    #[test]
    fn test_never_raises_outside_planning_and_execution() {
        let reply = AgentReply {
            tension: Some(1.0),
            choices: two_choices(),
            unresolved_conflict: true,
            ..AgentReply::default()
        };
        let detector = DecisionPointDetector::default();

        for phase in [Phase::ContextGathering, Phase::Synthesis, Phase::Output] {
            let result = result(phase, reply.clone());
            let point = detector.detect(&TurnContext {
                phase,
                result: &result,
                now: now(),
            });
            assert!(point.is_none(), "raised in {phase}");
        }
    }

    #[test]
    fn test_agent_hints_override_defaults() {
        let result = result(
            Phase::Planning,
            AgentReply {
                tension: Some(0.8),
                choices: two_choices(),
                decision_kind: Some(DecisionKind::WorldEvent),
                question: Some("Does the storm break?".to_owned()),
                ..AgentReply::default()
            },
        );
        let detector = DecisionPointDetector::new(DetectorConfig {
            decision_timeout_secs: None,
            ..DetectorConfig::default()
        });

        let point = detector
            .detect(&TurnContext {
                phase: Phase::Planning,
                result: &result,
                now: now(),
            })
            .unwrap();

        assert_eq!(point.kind(), DecisionKind::WorldEvent);
        assert_eq!(point.prompt(), "Does the storm break?");
        assert_eq!(point.expires_at(), None);
    }
}
