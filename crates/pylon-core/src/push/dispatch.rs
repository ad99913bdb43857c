//! API-session request dispatch.
//!
//! Requests arriving on an API session are routed to a processor located by
//! identity, gated by the injected authenticator and authorizer, and audited
//! once processed. The collaborators are a capability set passed explicitly
//! to the session, never process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::Event;

/// Operations a session request can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RetrieveMany,
    Retrieve,
    Create,
    Update,
    Delete,
    Info,
    Patch,
}

impl Operation {
    /// Returns `true` when the operation mutates entities and its events
    /// must be fanned out.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete | Self::Patch)
    }
}

/// Dynamic payload attached to requests and responses.
///
/// The concrete schema is the codec's concern; the core only distinguishes
/// the three shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Payload {
    Single(serde_json::Value),
    List(Vec<serde_json::Value>),
    Raw(serde_json::Value),
}

/// A single API request received on a session socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub id: String,
    pub operation: Operation,
    /// Route identity of the targeted resource.
    pub identity: String,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub data: Option<Payload>,
}

/// Response bound to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub data: Option<Payload>,
    /// Human-readable description when `status_code` signals a failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// Creates an empty 200 response bound to `request`.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            request_id: request.id.clone(),
            status_code: 200,
            data: None,
            error: None,
        }
    }
}

/// Failure raised by an operation dispatcher, carried back to the peer as an
/// error response.
#[derive(Debug, Clone, Error)]
#[error("{title}: {description}")]
pub struct DispatchError {
    pub status_code: u16,
    pub title: String,
    pub description: String,
}

impl DispatchError {
    /// Creates an error with an HTTP-style status code.
    #[must_use]
    pub fn new(status_code: u16, title: &str, description: &str) -> Self {
        Self {
            status_code,
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    /// Creates a `500 Internal Server Error`.
    #[must_use]
    pub fn internal(description: &str) -> Self {
        Self::new(500, "Internal Server Error", description)
    }

    /// Converts the error into the response record written to the peer.
    #[must_use]
    pub fn to_response(&self, request_id: &str) -> Response {
        Response {
            request_id: request_id.to_string(),
            status_code: self.status_code,
            data: None,
            error: Some(format!("{}: {}", self.title, self.description)),
        }
    }
}

/// What a processor produced for one request.
pub struct ProcessorOutput {
    pub response: Response,
    /// Events to fan out to event sessions after a mutating operation.
    pub events: Vec<Event>,
}

impl ProcessorOutput {
    /// Output carrying only a response.
    #[must_use]
    pub fn response(response: Response) -> Self {
        Self { response, events: Vec::new() }
    }
}

/// Authenticates a request, returning the caller's identity claims.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    async fn authenticate(&self, request: &Request) -> Result<Vec<String>, DispatchError>;
}

/// Authorizes an authenticated request.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, request: &Request, claims: &[String]) -> Result<(), DispatchError>;
}

/// Records the outcome of a processed request.
#[async_trait]
pub trait Auditer: Send + Sync {
    async fn audit(&self, request: &Request, response: &Response);
}

/// Handles requests for one route identity.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, request: &Request) -> Result<ProcessorOutput, DispatchError>;
}

/// Locates the processor serving a route identity.
pub trait ProcessorFinder: Send + Sync {
    fn find(&self, identity: &str) -> Option<Arc<dyn Processor>>;
}

/// Fan-out hook invoked with the events a mutating operation produced.
pub type PushEventsFn = Arc<dyn Fn(&[Event]) + Send + Sync>;

/// Capability set injected into API sessions.
#[derive(Clone)]
pub struct DispatchContext {
    pub processor_finder: Arc<dyn ProcessorFinder>,
    pub authenticator: Option<Arc<dyn RequestAuthenticator>>,
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub auditer: Option<Arc<dyn Auditer>>,
    pub push_events: Option<PushEventsFn>,
}

impl DispatchContext {
    /// Creates a context with only a processor finder; the optional
    /// collaborators default to absent.
    #[must_use]
    pub fn new(processor_finder: Arc<dyn ProcessorFinder>) -> Self {
        Self {
            processor_finder,
            authenticator: None,
            authorizer: None,
            auditer: None,
            push_events: None,
        }
    }
}

/// Runs one request through authentication, authorization, processing and
/// audit.
///
/// # Errors
///
/// Returns the [`DispatchError`] raised by the first collaborator that
/// refuses the request, or a 404 when no processor serves the identity.
pub async fn dispatch_request(
    context: &DispatchContext,
    request: &Request,
) -> Result<Response, DispatchError> {
    let claims = match &context.authenticator {
        Some(authenticator) => authenticator.authenticate(request).await?,
        None => Vec::new(),
    };

    if let Some(authorizer) = &context.authorizer {
        authorizer.authorize(request, &claims).await?;
    }

    let processor = context.processor_finder.find(&request.identity).ok_or_else(|| {
        DispatchError::new(
            404,
            "Not Found",
            &format!("no processor serves identity '{}'", request.identity),
        )
    })?;

    let output = processor.process(request).await?;

    if request.operation.is_mutating() && !output.events.is_empty() {
        if let Some(push_events) = &context.push_events {
            push_events(&output.events);
        }
    }

    if let Some(auditer) = &context.auditer {
        auditer.audit(request, &output.response).await;
    }

    Ok(output.response)
}
