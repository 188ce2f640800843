//! Which agents take part in which phase.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use taleweaver_core::error::DomainError;
use taleweaver_core::model::{AgentRole, Phase};

/// One participating agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Agent identifier.
    pub agent_id: String,
    /// The agent's role.
    pub role: AgentRole,
}

/// The agents taking part in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    /// The director's agent identifier.
    #[serde(default = "default_director")]
    pub director: String,
    /// The synthesizer's agent identifier.
    #[serde(default = "default_synthesizer")]
    pub synthesizer: String,
    /// One persona agent per character.
    pub personas: Vec<String>,
}

fn default_director() -> String {
    "director".to_owned()
}

fn default_synthesizer() -> String {
    "synthesizer".to_owned()
}

impl Cast {
    /// Creates a cast with the default director and synthesizer.
    #[must_use]
    pub fn new(personas: Vec<String>) -> Self {
        Self {
            director: default_director(),
            synthesizer: default_synthesizer(),
            personas,
        }
    }

    /// Checks that there is at least one persona and that every agent
    /// identifier is non-empty and unique.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.personas.is_empty() {
            return Err(DomainError::Validation(
                "a session needs at least one persona".to_owned(),
            ));
        }
        let mut seen = HashSet::new();
        for id in std::iter::once(&self.director)
            .chain(std::iter::once(&self.synthesizer))
            .chain(&self.personas)
        {
            if id.trim().is_empty() {
                return Err(DomainError::Validation(
                    "agent identifiers must not be blank".to_owned(),
                ));
            }
            if !seen.insert(id.as_str()) {
                return Err(DomainError::Validation(format!(
                    "agent identifier {id:?} is used twice"
                )));
            }
        }
        Ok(())
    }

    /// Expands roles into concrete agents, in role order.
    #[must_use]
    pub fn profiles(&self, roles: &[AgentRole]) -> Vec<AgentProfile> {
        let mut profiles = Vec::new();
        for role in roles {
            match role {
                AgentRole::Director => profiles.push(AgentProfile {
                    agent_id: self.director.clone(),
                    role: AgentRole::Director,
                }),
                AgentRole::Synthesizer => profiles.push(AgentProfile {
                    agent_id: self.synthesizer.clone(),
                    role: AgentRole::Synthesizer,
                }),
                AgentRole::Persona => {
                    profiles.extend(self.personas.iter().map(|id| AgentProfile {
                        agent_id: id.clone(),
                        role: AgentRole::Persona,
                    }));
                }
            }
        }
        profiles
    }
}

/// Roles participating in each phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseRoster {
    /// Roles for `context_gathering`.
    pub context_gathering: Vec<AgentRole>,
    /// Roles for `planning`.
    pub planning: Vec<AgentRole>,
    /// Roles for `execution`.
    pub execution: Vec<AgentRole>,
    /// Roles for `synthesis`.
    pub synthesis: Vec<AgentRole>,
    /// Roles for `output`.
    pub output: Vec<AgentRole>,
}

impl Default for PhaseRoster {
    fn default() -> Self {
        Self {
            context_gathering: vec![AgentRole::Director],
            planning: vec![AgentRole::Director, AgentRole::Persona],
            execution: vec![AgentRole::Persona],
            synthesis: vec![AgentRole::Synthesizer],
            output: vec![AgentRole::Synthesizer],
        }
    }
}

impl PhaseRoster {
    /// Roles configured for a phase.
    #[must_use]
    pub fn roles(&self, phase: Phase) -> &[AgentRole] {
        match phase {
            Phase::ContextGathering => &self.context_gathering,
            Phase::Planning => &self.planning,
            Phase::Execution => &self.execution,
            Phase::Synthesis => &self.synthesis,
            Phase::Output => &self.output,
        }
    }

    /// The agents of `cast` that take part in `phase`.
    #[must_use]
    pub fn participants(&self, phase: Phase, cast: &Cast) -> Vec<AgentProfile> {
        cast.profiles(self.roles(phase))
    }
}
