//! Profile domain: entity, messages, gateways and simulated handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clean::{
    async_trait, Entity, FailureInput, FailureResponse, Gateway, Input, Output, Request,
    RequestHandler, ResponseSender, SuccessInput, SuccessResponse, WatcherGateway,
};
use tracing::debug;

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileEntity {
    pub id: String,
    pub name: Option<String>,
    pub error: Option<String>,
    pub heartbeats: u32,
    pub last_seen: Option<u32>,
}

impl Entity for ProfileEntity {}

impl ProfileEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(&self, input: ProfileInput) -> Self {
        Self {
            name: Some(input.name),
            error: None,
            ..self.clone()
        }
    }

    pub fn with_error(&self, failure: FailureInput) -> Self {
        Self {
            error: Some(failure.message()),
            ..self.clone()
        }
    }

    pub fn with_heartbeat(&self, input: PresenceInput) -> Self {
        Self {
            heartbeats: self.heartbeats + 1,
            last_seen: Some(input.tick),
            ..self.clone()
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FetchProfileOutput {
    pub id: String,
}
impl Output for FetchProfileOutput {}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchPresenceOutput {
    pub id: String,
}
impl Output for WatchPresenceOutput {}

/// What a screen would render.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileViewOutput {
    pub headline: String,
}
impl Output for ProfileViewOutput {}

impl ProfileViewOutput {
    pub fn from_entity(entity: &ProfileEntity) -> Self {
        let headline = match (&entity.name, &entity.error) {
            (_, Some(error)) => format!("{}: {}", entity.id, error),
            (Some(name), None) => format!("{} ({} heartbeats)", name, entity.heartbeats),
            (None, None) => format!("{}: loading", entity.id),
        };
        Self { headline }
    }
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileInput {
    pub name: String,
}
impl Input for ProfileInput {}
impl SuccessInput for ProfileInput {}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceInput {
    pub tick: u32,
}
impl Input for PresenceInput {}
impl SuccessInput for PresenceInput {}

// =============================================================================
// Requests and responses
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRequest {
    pub id: String,
}
impl Request for ProfileRequest {}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileResponse {
    pub name: String,
}
impl SuccessResponse for ProfileResponse {}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRequest {
    pub id: String,
    pub ticks: u32,
}
impl Request for PresenceRequest {}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceResponse {
    pub tick: u32,
}
impl SuccessResponse for PresenceResponse {}

// =============================================================================
// Gateways
// =============================================================================

pub struct ProfileGateway;

impl Gateway for ProfileGateway {
    type Output = FetchProfileOutput;
    type Request = ProfileRequest;
    type Response = ProfileResponse;
    type Input = ProfileInput;

    fn build_request(&self, output: &FetchProfileOutput) -> ProfileRequest {
        ProfileRequest {
            id: output.id.clone(),
        }
    }

    fn on_success(&self, response: ProfileResponse) -> ProfileInput {
        ProfileInput {
            name: response.name,
        }
    }

    fn on_failure(&self, failure: FailureResponse) -> FailureInput {
        FailureInput::new(format!("profile unavailable ({})", failure.category))
    }
}

pub struct PresenceGateway {
    pub ticks: u32,
}

impl WatcherGateway for PresenceGateway {
    type Output = WatchPresenceOutput;
    type Request = PresenceRequest;
    type Response = PresenceResponse;
    type Input = PresenceInput;

    fn build_request(&self, output: &WatchPresenceOutput) -> PresenceRequest {
        PresenceRequest {
            id: output.id.clone(),
            ticks: self.ticks,
        }
    }

    fn on_success(&self, response: PresenceResponse) -> PresenceInput {
        PresenceInput {
            tick: response.tick,
        }
    }
}

// =============================================================================
// Simulated external services
// =============================================================================

/// In-memory stand-in for a profile service.
#[derive(Debug)]
pub struct ProfileDirectory {
    profiles: HashMap<String, String>,
}

impl ProfileDirectory {
    pub fn seeded() -> Self {
        let profiles = [("123", "Ada Lovelace"), ("456", "Grace Hopper")]
            .into_iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        Self { profiles }
    }

    fn find(&self, id: &str) -> Option<&String> {
        self.profiles.get(id)
    }
}

pub struct ProfileHandler {
    pub directory: Arc<ProfileDirectory>,
    pub latency: Duration,
}

#[async_trait]
impl RequestHandler<ProfileRequest, ProfileResponse> for ProfileHandler {
    async fn handle(
        &self,
        request: ProfileRequest,
        responses: ResponseSender<ProfileResponse>,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(self.latency).await;

        let name = self
            .directory
            .find(&request.id)
            .cloned()
            .ok_or_else(|| FailureResponse::not_found(format!("profile {}", request.id)))?;

        debug!(id = %request.id, "profile found");
        responses.send(ProfileResponse { name });
        Ok(())
    }
}

/// Emit one heartbeat every `interval` until `ticks` are sent or nobody
/// listens anymore.
pub async fn presence_handler(
    request: PresenceRequest,
    responses: ResponseSender<PresenceResponse>,
    interval: Duration,
) -> anyhow::Result<()> {
    for tick in 0..request.ticks {
        if !responses.send(PresenceResponse { tick }) {
            debug!(id = %request.id, "presence listener gone");
            break;
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}
