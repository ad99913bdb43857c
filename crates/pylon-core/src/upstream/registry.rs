//! Service registry fed by status-topic pings.
//!
//! Backend services announce themselves with hello pings and withdraw with
//! goodbye pings. The registry is the in-memory view of those announcements;
//! pings are its sole authority. A denormalized [`RouteTable`] is rebuilt
//! ("resynced") from the registry after every change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Status carried by a service ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    /// The endpoint is alive and serving.
    Hello,
    /// The endpoint is withdrawing from service.
    Goodbye,
}

/// Self-announcement record a backend publishes on the status topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub name: String,
    /// Reachable address of the announcing instance, as `host:port`.
    pub endpoint: String,
    pub status: PingStatus,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub private_routes: Vec<String>,
    #[serde(default)]
    pub event_routes: Vec<String>,
    /// Load fraction the backend reported in this ping.
    #[serde(default)]
    pub load: f64,
}

struct EndpointState {
    last_load: f64,
    last_seen: Instant,
}

/// A single backend instance reachable at one address.
///
/// The address is fixed for the lifetime of the endpoint; load and liveness
/// are refreshed by the registry writer under the endpoint's own lock, so
/// concurrent route-table readers can snapshot them without blocking writes
/// elsewhere.
pub struct Endpoint {
    address: String,
    state: RwLock<EndpointState>,
}

impl Endpoint {
    fn new(address: String, load: f64, now: Instant) -> Self {
        Self {
            address,
            state: RwLock::new(EndpointState { last_load: load, last_seen: now }),
        }
    }

    /// Network address of this endpoint, as `host:port`.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Point-in-time snapshot of `(address, last reported load)`.
    #[must_use]
    pub fn snapshot(&self) -> (String, f64) {
        let state = self.state.read();
        (self.address.clone(), state.last_load)
    }

    /// Load the backend reported in its most recent hello.
    #[must_use]
    pub fn last_load(&self) -> f64 {
        self.state.read().last_load
    }

    /// Time of the most recent hello for this endpoint.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.state.read().last_seen
    }

    fn refresh(&self, load: f64, now: Instant) {
        let mut state = self.state.write();
        state.last_load = load;
        state.last_seen = now;
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("last_load", &state.last_load)
            .finish()
    }
}

/// A named backend service exposing a set of route identities.
#[derive(Debug)]
pub struct Service {
    name: String,
    routes: HashSet<String>,
    private_routes: HashSet<String>,
    event_routes: HashSet<String>,
    endpoints: HashMap<String, Arc<Endpoint>>,
}

impl Service {
    fn from_ping(ping: &Ping) -> Self {
        Self {
            name: ping.name.clone(),
            routes: ping.routes.iter().cloned().collect(),
            private_routes: ping.private_routes.iter().cloned().collect(),
            event_routes: ping.event_routes.iter().cloned().collect(),
            endpoints: HashMap::new(),
        }
    }

    /// Name of the service.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Addresses of endpoints whose most recent hello predates `cutoff`.
    #[must_use]
    pub fn outdated_endpoints(&self, cutoff: Instant) -> Vec<String> {
        self.endpoints
            .values()
            .filter(|endpoint| endpoint.last_seen() < cutoff)
            .map(|endpoint| endpoint.address().to_string())
            .collect()
    }
}

/// Registry of known services, keyed by service name.
pub type ServiceMap = HashMap<String, Service>;

/// Denormalized index from route identity to the endpoints serving it.
pub type RouteTable = HashMap<String, Vec<Arc<Endpoint>>>;

/// Applies a hello ping to the registry.
///
/// An unknown service is created with the ping's route sets; the pinged
/// endpoint is inserted or refreshed with the reported load. Returns `true`
/// when the registry changed shape (a new endpoint appeared) and the route
/// table must be resynced; a plain liveness refresh returns `false`.
pub fn handle_add_service_ping(services: &mut ServiceMap, ping: &Ping, now: Instant) -> bool {
    let service = services
        .entry(ping.name.clone())
        .or_insert_with(|| Service::from_ping(ping));

    if let Some(endpoint) = service.endpoints.get(&ping.endpoint) {
        endpoint.refresh(ping.load, now);
        return false;
    }

    service.endpoints.insert(
        ping.endpoint.clone(),
        Arc::new(Endpoint::new(ping.endpoint.clone(), ping.load, now)),
    );
    true
}

/// Removes `endpoint` from the service called `name`.
///
/// Returns `true` when the endpoint was present. A service left with no
/// endpoints is dropped from the registry entirely.
pub fn handle_remove_service_ping(services: &mut ServiceMap, name: &str, endpoint: &str) -> bool {
    let Some(service) = services.get_mut(name) else {
        return false;
    };

    let removed = service.endpoints.remove(endpoint).is_some();
    if service.endpoints.is_empty() {
        services.remove(name);
    }
    removed
}

/// Rebuilds the full route table from the current registry.
///
/// An endpoint of service `s` is indexed under identity `r` when `s` declares
/// `r` and either the route is public, private routes are exposed, or `r` is
/// listed in `events_apis`. Event routes are additionally indexed when they
/// appear in `events_apis`. Endpoint lists are sorted by address so the
/// ordering is stable within a single resync.
#[must_use]
pub fn resync_routes(
    services: &ServiceMap,
    expose_private_apis: bool,
    events_apis: &HashSet<String>,
) -> RouteTable {
    let mut table = RouteTable::new();

    for service in services.values() {
        for route in &service.routes {
            let private = service.private_routes.contains(route);
            if private && !expose_private_apis && !events_apis.contains(route) {
                continue;
            }
            table
                .entry(route.clone())
                .or_default()
                .extend(service.endpoints.values().cloned());
        }

        for route in &service.event_routes {
            if events_apis.contains(route) && !service.routes.contains(route) {
                table
                    .entry(route.clone())
                    .or_default()
                    .extend(service.endpoints.values().cloned());
            }
        }
    }

    for endpoints in table.values_mut() {
        endpoints.sort_by(|a, b| a.address().cmp(b.address()));
    }

    table
}
