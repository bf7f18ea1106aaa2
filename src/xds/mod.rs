//! Route discovery protocol surface.
//!
//! - [`proto`] - Hand-written wire messages for discovery and route configuration
//! - [`connections`] - Active session set and non-blocking broadcast
//! - [`session`] - Per-stream Connecting/Streaming/Closed loop
//! - [`server`] - Discovery server: change notification, stream admission, shutdown
//! - [`grpc`] - Tonic services for the v2 and v3 APIs, plus a probe client

pub mod connections;
pub mod grpc;
pub mod proto;
pub mod server;
pub mod session;
