//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use gatewatch::control::resource::RoutingResource;
use gatewatch::control::translate::RouteTranslator;
use gatewatch::xds::proto::{ApiVersion, DiscoveryRequest, DiscoveryResponse, Node};
use gatewatch::xds::server::{DiscoveryServer, ResponseStream, SessionSettings};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;

pub const HOSTNAME: &str = "stoakes.github.com/hostname";
pub const CLUSTER: &str = "stoakes.github.com/cluster";
pub const PREFIX: &str = "stoakes.github.com/prefix";

/// Write `content` to a temporary file.
pub fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

/// Gateway resource with hostname and cluster annotations.
pub fn gateway(name: &str, hosts: &str, cluster: &str) -> RoutingResource {
    RoutingResource::new(name, "default")
        .with_annotation(HOSTNAME, hosts)
        .with_annotation(CLUSTER, cluster)
}

/// First request of a well-behaved client.
pub fn hello(node_id: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        node: Some(Node {
            id: node_id.to_string(),
            cluster: "edge".to_string(),
        }),
        ..Default::default()
    }
}

/// Settings with short timers so shutdown tests finish quickly.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        queue_depth: 8,
        send_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
        session_grace: Duration::from_millis(200),
        drain_grace: Duration::from_millis(500),
    }
}

pub fn test_server() -> DiscoveryServer {
    DiscoveryServer::new(RouteTranslator::default(), fast_settings())
}

/// A client stream attached to an in-process server.
pub struct TestClient {
    pub requests: mpsc::Sender<Result<DiscoveryRequest, Status>>,
    pub responses: ResponseStream,
}

impl TestClient {
    /// Open a stream and send `first` as its first request.
    pub async fn open(
        server: &DiscoveryServer,
        api: ApiVersion,
        first: DiscoveryRequest,
    ) -> Result<Self, gatewatch::error::GatewatchError> {
        let (requests, rx) = mpsc::channel(8);
        requests.send(Ok(first)).await.expect("request channel open");
        let (_, responses) = server.open_stream(api, ReceiverStream::new(rx)).await?;
        Ok(Self {
            requests,
            responses,
        })
    }

    /// Next pushed response, failing the test after two seconds.
    pub async fn next(&mut self) -> Option<Result<DiscoveryResponse, Status>> {
        tokio::time::timeout(Duration::from_secs(2), self.responses.next())
            .await
            .expect("timed out waiting for response")
    }

    /// Whether a response arrives within `wait`.
    pub async fn quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.responses.next())
            .await
            .is_err()
    }
}
