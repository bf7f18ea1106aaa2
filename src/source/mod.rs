//! Upstream resource sources.
//!
//! A source lists routing resources from somewhere outside the process and
//! turns changes into [`ResourceEvent`]s delivered to an [`EventSink`].
//!
//! - [`manifest`] - TOML manifest file, re-listed on an interval

pub mod manifest;

use crate::control::resource::ResourceEvent;
use crate::core::error::GatewatchResult;
use crate::xds::server::DiscoveryServer;

/// Receiver of resource change events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Errors mean the sink no longer accepts events.
    fn notify_change(&self, event: ResourceEvent) -> GatewatchResult<()>;
}

impl EventSink for DiscoveryServer {
    fn notify_change(&self, event: ResourceEvent) -> GatewatchResult<()> {
        DiscoveryServer::notify_change(self, event).map(|_| ())
    }
}
