//! Routing state and its translation.
//!
//! - [`resource`] - Routing resources and change events
//! - [`registry`] - Authoritative resource set and snapshots
//! - [`translate`] - Snapshot to route configuration translation

pub mod registry;
pub mod resource;
pub mod translate;
