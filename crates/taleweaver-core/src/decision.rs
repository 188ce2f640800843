//! Decision points: pipeline-raised requests for human input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::Phase;

/// What the decision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Which way the story goes next.
    NarrativeBranch,
    /// How an open conflict is settled.
    ConflictResolution,
    /// What a character does.
    CharacterAction,
    /// Whether a world event happens.
    WorldEvent,
}

/// How pressing the decision is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Can wait.
    Low,
    /// Default.
    Medium,
    /// Tension is at its peak.
    High,
}

/// One selectable choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    /// Option identifier, unique within its decision.
    pub id: String,
    /// Short label.
    pub label: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// What choosing this option is expected to cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequences: Option<String>,
    /// Whether this option is the default on expiry.
    #[serde(default)]
    pub recommended: bool,
}

impl DecisionOption {
    /// Creates an option with an empty description.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            consequences: None,
            recommended: false,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the option as recommended.
    #[must_use]
    pub fn recommended(mut self) -> Self {
        self.recommended = true;
        self
    }
}

/// A request for human input. Always carries at least one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecisionPoint")]
pub struct DecisionPoint {
    id: Uuid,
    kind: DecisionKind,
    prompt: String,
    options: Vec<DecisionOption>,
    urgency: Urgency,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    raised_in: Phase,
}

#[derive(Deserialize)]
struct RawDecisionPoint {
    id: Uuid,
    kind: DecisionKind,
    prompt: String,
    options: Vec<DecisionOption>,
    urgency: Urgency,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    raised_in: Phase,
}

impl TryFrom<RawDecisionPoint> for DecisionPoint {
    type Error = DomainError;

    fn try_from(raw: RawDecisionPoint) -> Result<Self, Self::Error> {
        let mut point = Self::new(raw.kind, raw.prompt, raw.options, raw.urgency, raw.raised_in)?;
        point.id = raw.id;
        point.expires_at = raw.expires_at;
        Ok(point)
    }
}

impl DecisionPoint {
    /// Creates a decision point with a fresh identifier and no expiry.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `options` is empty.
    pub fn new(
        kind: DecisionKind,
        prompt: impl Into<String>,
        options: Vec<DecisionOption>,
        urgency: Urgency,
        raised_in: Phase,
    ) -> Result<Self, DomainError> {
        if options.is_empty() {
            return Err(DomainError::Validation(
                "a decision point needs at least one option".to_owned(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            prompt: prompt.into(),
            options,
            urgency,
            expires_at: None,
            raised_in,
        })
    }

    /// Sets the time after which the decision auto-resolves.
    #[must_use]
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Decision identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// What the decision is about.
    #[must_use]
    pub fn kind(&self) -> DecisionKind {
        self.kind
    }

    /// The question put to the human.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The offered options, never empty.
    #[must_use]
    pub fn options(&self) -> &[DecisionOption] {
        &self.options
    }

    /// How pressing the decision is.
    #[must_use]
    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    /// When the decision auto-resolves, if ever.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// The phase whose output raised the decision.
    #[must_use]
    pub fn raised_in(&self) -> Phase {
        self.raised_in
    }

    /// Looks up an option by identifier.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&DecisionOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// The option chosen on expiry: the first recommended one, else the
    /// first. `None` only for a decision without options, which
    /// construction and deserialization both reject.
    #[must_use]
    pub fn default_option(&self) -> Option<&DecisionOption> {
        self.options
            .iter()
            .find(|o| o.recommended)
            .or_else(|| self.options.first())
    }

    /// Whether the decision has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The outcome of a resolved decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResolution {
    /// The resolved decision.
    pub decision_id: Uuid,
    /// The chosen option.
    pub option_id: String,
    /// `true` when the decision expired and the default option was taken.
    pub auto_resolved: bool,
    /// When the decision was resolved.
    pub resolved_at: DateTime<Utc>,
}
