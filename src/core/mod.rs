//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Process lifecycle: listener, resource source, shutdown
//! - [`error`] - Error types and gRPC status mapping

pub mod config;
pub mod error;
pub mod runtime;
