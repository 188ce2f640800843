//! Generation backends the server can drive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use taleweaver_core::generation::{GenerationError, GenerationRequest, GenerationService};
use taleweaver_core::model::AgentRole;
use tracing::debug;

use crate::error::AppError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct GenerationReply {
    text: String,
}

/// Posts each agent call as JSON to a text generation endpoint and reads
/// `{"text": ...}` back.
#[derive(Debug, Clone)]
pub struct HttpGenerationService {
    client: reqwest::Client,
    url: String,
}

impl HttpGenerationService {
    /// # Errors
    ///
    /// `AppError::Config` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Rate limiting and server errors are worth retrying; any other refusal is
/// final.
fn classify(status: StatusCode, body: &str) -> GenerationError {
    let message = format!("{status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GenerationError::Transport(message)
    } else {
        GenerationError::Rejected(message)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        debug!(agent_id = %request.agent_id, phase = %request.phase, "posting generation request");
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let reply: GenerationReply = response
            .json()
            .await
            .map_err(|e| GenerationError::Rejected(format!("malformed reply: {e}")))?;
        Ok(reply.text)
    }
}

/// Offline backend. Replies with a short line naming the agent and phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerationService;

#[async_trait]
impl GenerationService for EchoGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let line = match request.role {
            AgentRole::Director => format!("The director frames the {} of the scene.", request.phase),
            AgentRole::Synthesizer => format!("The tale moves on after {}.", request.phase),
            AgentRole::Persona => format!("{} acts during {}.", request.agent_id, request.phase),
        };
        Ok(line)
    }
}
