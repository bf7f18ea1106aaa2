//! Gatewatch - route discovery server driven by gateway annotations.
//!
//! Gatewatch watches a set of routing resources (gateways carrying hostname,
//! cluster and path prefix annotations), translates them into a single route
//! configuration, and streams it to every connected proxy over the route
//! discovery protocol. Each change to the resource set produces exactly one
//! new configuration version, pushed to all live streams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Resource source (manifest)                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ Add / Update / Delete
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        DiscoveryServer                          │
//! │   ResourceRegistry │ version │ RouteTranslator  (control lock)  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ broadcast
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          ConnectionManager: one bounded queue per session       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        gRPC: envoy.api.v2 / envoy.service.route.v3 RDS          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Process lifecycle orchestration
//! - [`core::error`] - Error types and gRPC status mapping
//!
//! ## Control
//! - [`control::resource`] - Routing resources and change events
//! - [`control::registry`] - Authoritative resource set
//! - [`control::translate`] - Annotation to route configuration translation
//!
//! ## Discovery protocol
//! - [`xds::proto`] - Wire messages
//! - [`xds::connections`] - Session set and broadcast
//! - [`xds::session`] - Per-stream session loop
//! - [`xds::server`] - Discovery server
//! - [`xds::grpc`] - Tonic services and probe client
//!
//! ## Sources
//! - [`source::manifest`] - TOML manifest source
//!
//! ## Operations
//! - [`ops::metrics`] - Server counters
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - One registry state maps to one configuration version; versions only grow.
//! - A new stream receives the current configuration before any broadcast.
//! - Broadcasts never block on a session; full queues disconnect the session.
//! - After shutdown no session is active and no broadcast succeeds.

// Core infrastructure
pub mod core;

// Routing state and translation
pub mod control;

// Discovery protocol
pub mod xds;

// Resource sources
pub mod source;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use control::{registry, resource, translate};
pub use xds::server::DiscoveryServer;
