//! Scripted `GenerationService` for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use taleweaver_core::generation::{GenerationError, GenerationRequest, GenerationService};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Fail(GenerationError),
    /// Never return; the caller's timeout or cancellation must fire.
    Hang,
    /// Panic with this message.
    Panic(&'static str),
}

/// A generation service that answers per agent from a script.
///
/// Each agent has a queue of one-shot replies and an optional standing reply
/// used once the queue is empty. Agents without either get a short plain-text
/// default naming the agent and phase. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedGenerationService {
    queued: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    standing: Mutex<HashMap<String, ScriptedReply>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerationService {
    /// Creates a service where every agent gets the default reply.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot reply for `agent_id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn then(self, agent_id: &str, reply: ScriptedReply) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(agent_id.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    /// Sets the reply `agent_id` gets whenever its queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn always(self, agent_id: &str, reply: ScriptedReply) -> Self {
        self.standing
            .lock()
            .unwrap()
            .insert(agent_id.to_owned(), reply);
        self
    }

    /// Returns a snapshot of every request received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests made by `agent_id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self, agent_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.agent_id == agent_id)
            .count()
    }

    fn next_reply(&self, request: &GenerationRequest) -> ScriptedReply {
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.agent_id)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(reply) = self.standing.lock().unwrap().get(&request.agent_id) {
            return reply.clone();
        }
        ScriptedReply::Text(format!(
            "{} ({}) contributes to {}",
            request.agent_id, request.role, request.phase
        ))
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.next_reply(request) {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Hang => std::future::pending().await,
            ScriptedReply::Panic(message) => panic!("{message}"),
        }
    }
}
