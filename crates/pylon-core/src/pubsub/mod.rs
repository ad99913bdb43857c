//! Publish/subscribe contract consumed by the gateway core.
//!
//! The concrete transport (Kafka, NATS, ...) lives outside this crate; the
//! core only consumes the publish/subscribe contract below. An in-process
//! implementation is provided in [`memory`] for tests and embedded
//! deployments.

pub mod memory;

pub use memory::MemoryPubSub;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffer depth for subscription channels.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 1024;

/// Errors surfaced by a pub/sub transport.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PubSubError {
    /// The transport connection is beyond recovery. Consumers treat this as
    /// fatal.
    #[error("invalid connection")]
    InvalidConnection,

    /// A publication body could not be encoded or decoded.
    #[error("unable to encode or decode publication: {0}")]
    Codec(String),

    /// The transport refused or dropped a publish.
    #[error("publish failed: {0}")]
    Publish(String),
}

impl From<serde_json::Error> for PubSubError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// A message on a pub/sub topic.
///
/// The body is an opaque byte record; [`encode`](Self::encode) and
/// [`decode`](Self::decode) move typed values in and out of it.
#[derive(Debug, Clone)]
pub struct Publication {
    topic: String,
    data: Vec<u8>,
}

impl Publication {
    /// Creates an empty publication addressed to `topic`.
    #[must_use]
    pub fn new(topic: &str) -> Self {
        Self { topic: topic.to_string(), data: Vec::new() }
    }

    /// Serializes `value` into the publication body.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::Codec`] when serialization fails.
    pub fn encode<T: Serialize>(&mut self, value: &T) -> Result<(), PubSubError> {
        self.data = serde_json::to_vec(value)?;
        Ok(())
    }

    /// Deserializes the publication body.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::Codec`] when the body does not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PubSubError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Topic this publication is addressed to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw body of the publication.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A live subscription to one topic.
///
/// Dropping the subscription cancels it; the transport stops forwarding once
/// the receivers are gone.
pub struct Subscription {
    /// Publications received on the topic, in arrival order.
    pub publications: mpsc::Receiver<Publication>,
    /// Transport errors observed while the subscription is live.
    pub errors: mpsc::Receiver<PubSubError>,
}

/// Client side of a pub/sub transport.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Publishes `publication` to its topic.
    ///
    /// # Errors
    ///
    /// Returns a [`PubSubError`] when the transport cannot accept the
    /// publication.
    async fn publish(&self, publication: Publication) -> Result<(), PubSubError>;

    /// Opens a subscription to `topic`.
    fn subscribe(&self, topic: &str) -> Subscription;
}
