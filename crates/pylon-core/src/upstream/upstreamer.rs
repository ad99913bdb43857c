//! Push-backed upstream router.
//!
//! The [`Upstreamer`] subscribes to a status topic, maintains the service
//! registry from the hello/goodbye pings flowing there, and answers
//! [`upstream`](Upstreamer::upstream) lookups against an atomically swapped
//! route table. Completed calls feed their response time back through
//! [`collect`](Upstreamer::collect), biasing the next selection toward the
//! faster backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pubsub::{PubSubClient, PubSubError};

use super::identity::extract_target_identity;
use super::moving_average::MovingAverage;
use super::registry::{
    handle_add_service_ping, handle_remove_service_ping, resync_routes, Ping, PingStatus,
    RouteTable, ServiceMap,
};

/// Configuration for the [`Upstreamer`].
#[derive(Debug, Clone)]
pub struct UpstreamerConfig {
    /// Service names whose first hello flips the ready signal.
    pub required_services: Vec<String>,
    /// Duration after which an endpoint without a refreshing hello is evicted.
    pub service_timeout: Duration,
    /// Scan period for outdated endpoints.
    pub service_timeout_check_interval: Duration,
    /// Per-endpoint moving-average capacity for the feedback loop.
    pub feedback_loop_samples: usize,
    /// When `false`, routes marked private are excluded from the route table.
    pub expose_private_apis: bool,
    /// Route identities always exposed regardless of privacy.
    pub events_apis: HashSet<String>,
    /// Optional host substituted into pinged endpoint addresses, keeping the
    /// pinged port.
    pub override_endpoint_address: Option<String>,
}

impl Default for UpstreamerConfig {
    fn default() -> Self {
        Self {
            required_services: Vec::new(),
            service_timeout: Duration::from_secs(30),
            service_timeout_check_interval: Duration::from_secs(5),
            feedback_loop_samples: 100,
            expose_private_apis: false,
            events_apis: HashSet::new(),
            override_endpoint_address: None,
        }
    }
}

/// Push-backed upstream router.
///
/// Readers go through the route table lock-free; the single writer is the
/// listener task spawned by [`start`](Self::start), which swaps in a freshly
/// resynced table after every registry change.
pub struct Upstreamer {
    pubsub: Arc<dyn PubSubClient>,
    service_status_topic: String,
    routes: ArcSwap<RouteTable>,
    feedback_loop: DashMap<String, MovingAverage>,
    randomizer: Mutex<StdRng>,
    config: UpstreamerConfig,
}

impl Upstreamer {
    /// Creates a router listening for service pings on `service_status_topic`.
    #[must_use]
    pub fn new(
        pubsub: Arc<dyn PubSubClient>,
        service_status_topic: &str,
        config: UpstreamerConfig,
    ) -> Self {
        Self {
            pubsub,
            service_status_topic: service_status_topic.to_string(),
            routes: ArcSwap::from_pointee(RouteTable::new()),
            feedback_loop: DashMap::new(),
            randomizer: Mutex::new(StdRng::from_entropy()),
            config,
        }
    }

    /// Returns the upstream address and last reported load for `path`, or
    /// `None` when no registered endpoint serves the path's route identity.
    ///
    /// With more than one candidate, two distinct endpoints are drawn at
    /// random and weighted by their measured response times, falling back to
    /// the loads the backends reported themselves until both have samples.
    /// A draw landing in the lighter candidate's share of the cumulative
    /// distribution selects the heavier one: lower measured response time
    /// means the endpoint should attract more of the traffic.
    #[must_use]
    pub fn upstream(&self, path: &str) -> Option<(String, f64)> {
        let target = extract_target_identity(path);
        let table = self.routes.load();
        let endpoints = table.get(target)?;

        let (n1, n2) = match endpoints.len() {
            0 => return None,
            1 => return Some(endpoints[0].snapshot()),
            2 => (0, 1),
            n => {
                let mut randomizer = self.randomizer.lock();
                pick_two(&mut randomizer, n)
            }
        };

        let mut candidates = [endpoints[n1].snapshot(), endpoints[n2].snapshot()];
        let mut weights = [self.measure(&candidates[0].0), self.measure(&candidates[1].0)];

        if weights[0] == 0.0 || weights[1] == 0.0 {
            weights[0] = candidates[0].1;
            weights[1] = candidates[1].1;
        }

        if weights[0] > weights[1] {
            candidates.swap(0, 1);
            weights.swap(0, 1);
        }

        let cumulative = weights[0] + weights[1];
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let draw = {
            let mut randomizer = self.randomizer.lock();
            randomizer.gen_range(0..=cumulative.max(0.0) as u64) as f64
        };

        let (address, load) = if draw <= weights[0] {
            candidates[1].clone()
        } else {
            candidates[0].clone()
        };
        Some((address, load))
    }

    /// Records a response-time sample for `address`.
    ///
    /// Zero durations are ignored. The first sample for an address only
    /// allocates its window; the value itself is not recorded, so an
    /// endpoint needs a second observation before it starts measuring.
    pub fn collect(&self, address: &str, elapsed: Duration) {
        #[allow(clippy::cast_precision_loss)]
        let sample = elapsed.as_micros() as f64;
        if sample == 0.0 {
            return;
        }

        if let Some(window) = self.feedback_loop.get(address) {
            window.add(sample);
        } else {
            self.feedback_loop.insert(
                address.to_string(),
                MovingAverage::new(self.config.feedback_loop_samples),
            );
        }
    }

    /// Average measured response time for `address`, `0.0` when no samples
    /// have been recorded.
    fn measure(&self, address: &str) -> f64 {
        self.feedback_loop
            .get(address)
            .map_or(0.0, |window| window.average())
    }

    /// Starts the status-topic listener.
    ///
    /// The returned receiver flips to `true` (exactly once) when every
    /// required service has produced at least one hello, immediately when
    /// none are required. The listener runs until `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> watch::Receiver<bool> {
        let (ready_tx, ready_rx) = watch::channel(false);
        let upstreamer = Arc::clone(self);
        tokio::spawn(async move {
            upstreamer.listen(shutdown, ready_tx).await;
        });
        ready_rx
    }

    async fn listen(&self, shutdown: CancellationToken, ready: watch::Sender<bool>) {
        let mut subscription = self.pubsub.subscribe(&self.service_status_topic);

        let mut services = ServiceMap::new();

        let mut pending_required: HashSet<String> =
            self.config.required_services.iter().cloned().collect();
        let mut ready_sent = false;
        if pending_required.is_empty() {
            ready_sent = true;
            let _ = ready.send(true);
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.service_timeout_check_interval,
            self.config.service_timeout_check_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut errors_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evict_outdated(&mut services);
                }

                publication = subscription.publications.recv() => {
                    let Some(publication) = publication else {
                        warn!(topic = %self.service_status_topic, "status subscription closed");
                        return;
                    };

                    let mut ping: Ping = match publication.decode() {
                        Ok(ping) => ping,
                        Err(err) => {
                            error!(error = %err, "unable to decode service ping");
                            continue;
                        }
                    };

                    if let Some(host) = &self.config.override_endpoint_address {
                        if let Some((_, port)) = ping.endpoint.rsplit_once(':') {
                            ping.endpoint = format!("{host}:{port}");
                        }
                    }

                    match ping.status {
                        PingStatus::Hello => {
                            if handle_add_service_ping(&mut services, &ping, Instant::now()) {
                                self.resync(&services);
                                debug!(name = %ping.name, backend = %ping.endpoint, "handled service hello");
                            }

                            if !ready_sent
                                && pending_required.remove(&ping.name)
                                && pending_required.is_empty()
                            {
                                ready_sent = true;
                                let _ = ready.send(true);
                            }
                        }
                        PingStatus::Goodbye => {
                            if handle_remove_service_ping(&mut services, &ping.name, &ping.endpoint) {
                                self.resync(&services);
                                self.feedback_loop.remove(&ping.endpoint);
                                debug!(name = %ping.name, backend = %ping.endpoint, "handled service goodbye");
                            }
                        }
                    }
                }

                err = subscription.errors.recv(), if errors_open => {
                    match err {
                        Some(PubSubError::InvalidConnection) => {
                            error!("unrecoverable error from pubsub");
                            std::process::exit(1);
                        }
                        Some(err) => {
                            error!(error = %err, "received error from pubsub");
                        }
                        None => errors_open = false,
                    }
                }

                _ = shutdown.cancelled() => return,
            }
        }
    }

    fn evict_outdated(&self, services: &mut ServiceMap) {
        let cutoff = Instant::now() - self.config.service_timeout;

        let outdated: Vec<(String, String)> = services
            .values()
            .flat_map(|service| {
                service
                    .outdated_endpoints(cutoff)
                    .into_iter()
                    .map(|endpoint| (service.name().to_string(), endpoint))
            })
            .collect();

        let mut found_outdated = false;
        for (name, endpoint) in outdated {
            found_outdated |= handle_remove_service_ping(services, &name, &endpoint);
            self.feedback_loop.remove(&endpoint);
            info!(name = %name, backend = %endpoint, "handled outdated service");
        }

        if found_outdated {
            self.resync(services);
        }
    }

    fn resync(&self, services: &ServiceMap) {
        self.routes.store(Arc::new(resync_routes(
            services,
            self.config.expose_private_apis,
            &self.config.events_apis,
        )));
    }
}

/// Draws two distinct uniform indices in `[0, n)`.
fn pick_two(randomizer: &mut StdRng, n: usize) -> (usize, usize) {
    let first = randomizer.gen_range(0..n);
    let mut second = randomizer.gen_range(0..n - 1);
    if second >= first {
        second += 1;
    }
    (first, second)
}
