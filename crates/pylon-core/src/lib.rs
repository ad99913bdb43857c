//! # Pylon Core
//!
//! Core library for the pylon ReST/event gateway runtime.
//!
//! This crate provides the foundational components for:
//!
//! - **[`upstream`]**: Push-fed upstream routing. A registry of backend services,
//!   maintained live from a pub/sub status topic, answers which backend endpoint
//!   should serve each inbound path using two-choice weighted random selection
//!   biased by a response-time feedback loop.
//!
//! - **[`push`]**: Long-lived bidirectional push sessions over framed sockets,
//!   in one of two roles: event fan-out with client-supplied filters, or API
//!   request dispatch with per-operation panic containment.
//!
//! - **[`pubsub`]**: The publish/subscribe contract the router consumes, plus an
//!   in-process implementation for tests and embedded deployments.
//!
//! - **[`health`]**: Concurrent health polling over named pingers.
//!
//! ## Architecture
//!
//! ```text
//! status topic ──► Upstreamer ──► ServiceRegistry ──► RouteTable
//!                      ▲                                   │
//!                      │ collect(address, elapsed)         ▼
//!                 HTTP dispatcher ◄──── upstream(path) → (address, load)
//!
//! framed socket ──► PushSession (read / write / control loops)
//!                      ▲                    │
//!             direct_push(events)      Request dispatch
//! ```
//!
//! The HTTP surface itself (framing, TLS, CORS), authentication policy and the
//! concrete pub/sub transport are external collaborators consumed through the
//! seams in [`pubsub`], [`push::socket`] and [`push::dispatch`].

pub mod health;
pub mod pubsub;
pub mod push;
pub mod upstream;
