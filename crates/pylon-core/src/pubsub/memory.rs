//! In-process pub/sub bus.
//!
//! Fans publications out to every live subscription of a topic. Used by the
//! test suites and by embedded deployments that do not need an external
//! broker.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use super::{PubSubClient, PubSubError, Publication, Subscription, SUBSCRIPTION_BUFFER};

struct Topic {
    publications: broadcast::Sender<Publication>,
    errors: broadcast::Sender<PubSubError>,
}

/// In-process [`PubSubClient`] backed by per-topic broadcast channels.
#[derive(Default)]
pub struct MemoryPubSub {
    topics: DashMap<String, Topic>,
}

impl MemoryPubSub {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_topic<R>(&self, topic: &str, f: impl FnOnce(&Topic) -> R) -> R {
        let entry = self.topics.entry(topic.to_string()).or_insert_with(|| Topic {
            publications: broadcast::channel(SUBSCRIPTION_BUFFER).0,
            errors: broadcast::channel(SUBSCRIPTION_BUFFER).0,
        });
        f(&entry)
    }

    /// Injects a transport error into every live subscription of `topic`.
    ///
    /// Lets tests exercise the error paths of subscribers without a real
    /// broker misbehaving on cue.
    pub fn inject_error(&self, topic: &str, error: PubSubError) {
        self.with_topic(topic, |t| {
            let _ = t.errors.send(error);
        });
    }
}

#[async_trait]
impl PubSubClient for MemoryPubSub {
    async fn publish(&self, publication: Publication) -> Result<(), PubSubError> {
        let topic = publication.topic().to_string();
        self.with_topic(&topic, |t| {
            // A publish with no live subscribers is not an error.
            let _ = t.publications.send(publication);
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let (mut publication_source, mut error_source) = self.with_topic(topic, |t| {
            (t.publications.subscribe(), t.errors.subscribe())
        });

        let (publication_tx, publications) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (error_tx, errors) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                match publication_source.recv().await {
                    Ok(publication) => {
                        if publication_tx.send(publication).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match error_source.recv().await {
                    Ok(error) => {
                        if error_tx.send(error).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Subscription { publications, errors }
    }
}
