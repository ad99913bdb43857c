//! Push-fed upstream routing.
//!
//! This module answers, for each inbound request path, which backend endpoint
//! should serve it and at what weight:
//!
//! - A [`registry`] of backend services is maintained from hello/goodbye pings
//!   published on a status topic, with heartbeat-based eviction of endpoints
//!   that stop refreshing themselves.
//! - The [`Upstreamer`] listens on the topic, keeps a denormalized route table
//!   up to date, and selects between candidate endpoints with two-choice
//!   weighted random sampling.
//! - A per-endpoint [`MovingAverage`] of observed response times feeds the
//!   selection back toward the faster backend.

pub mod errors;
pub mod identity;
pub mod moving_average;
pub mod registry;
pub mod upstreamer;

pub use errors::UpstreamerError;
pub use identity::{extract_api_version, extract_route, extract_target_identity};
pub use moving_average::MovingAverage;
pub use registry::{
    handle_add_service_ping, handle_remove_service_ping, resync_routes, Endpoint, Ping,
    PingStatus, RouteTable, Service, ServiceMap,
};
pub use upstreamer::{Upstreamer, UpstreamerConfig};
