//! End-to-end tests over a real gRPC listener.

mod common;

use common::{gateway, hello, test_server};
use gatewatch::control::resource::ResourceEvent;
use gatewatch::xds::grpc::{listener_addr, RouteDiscoveryClient};
use gatewatch::xds::proto::{
    ApiVersion, DiscoveryRequest, Node, RouteConfiguration, ROUTE_TYPE_URL_V2, ROUTE_TYPE_URL_V3,
};
use gatewatch::DiscoveryServer;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::Code;

async fn serve() -> (DiscoveryServer, String) {
    let server = test_server();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener_addr(&listener).unwrap();
    server.spawn_listener(listener).unwrap();
    (server, format!("http://{}", addr))
}

fn node(id: &str) -> Node {
    hello(id).node.unwrap()
}

#[tokio::test]
async fn subscribe_receive_push_and_ack() {
    let (server, endpoint) = serve().await;
    server
        .notify_change(ResourceEvent::Add(gateway("edge", "a.com,b.com", "svc1")))
        .unwrap();

    let mut client = RouteDiscoveryClient::connect(endpoint, ApiVersion::V3)
        .await
        .unwrap();
    let mut subscription = client
        .subscribe(DiscoveryRequest {
            type_url: ROUTE_TYPE_URL_V3.to_string(),
            ..hello("envoy-1")
        })
        .await
        .unwrap();

    let first = subscription.next_response().await.unwrap().unwrap();
    assert_eq!(first.version_info, "1");
    assert_eq!(first.type_url, ROUTE_TYPE_URL_V3);
    let config: RouteConfiguration = first.resources[0].unpack().unwrap();
    assert_eq!(config.virtual_hosts[0].domains, vec!["a.com", "b.com"]);
    assert!(subscription.ack(&node("envoy-1"), &first).await);

    server
        .notify_change(ResourceEvent::Add(gateway("api", "api.com", "svc2")))
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), subscription.next_response())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.version_info, "2");
    assert_ne!(second.nonce, first.nonce);
    let config: RouteConfiguration = second.resources[0].unpack().unwrap();
    assert_eq!(config.virtual_hosts.len(), 2);
    assert!(subscription.ack(&node("envoy-1"), &second).await);

    let report = server.shutdown().await;
    assert_eq!(report.signalled, 1);
    let status = subscription.next_response().await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test]
async fn v2_stream_gets_v2_type_url() {
    let (server, endpoint) = serve().await;
    let mut client = RouteDiscoveryClient::connect(endpoint, ApiVersion::V2)
        .await
        .unwrap();
    let mut subscription = client.subscribe(hello("envoy-v2")).await.unwrap();

    let first = subscription.next_response().await.unwrap().unwrap();
    assert_eq!(first.type_url, ROUTE_TYPE_URL_V2);
    assert_eq!(first.version_info, "0");
    server.shutdown().await;
}

#[tokio::test]
async fn invalid_subscriber_gets_invalid_argument() {
    let (server, endpoint) = serve().await;
    let mut client = RouteDiscoveryClient::connect(endpoint, ApiVersion::V3)
        .await
        .unwrap();

    let status = match client.subscribe(DiscoveryRequest::default()).await {
        Ok(mut subscription) => subscription.next_response().await.unwrap_err(),
        Err(status) => status,
    };
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(server.session_count(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn fetch_is_unimplemented() {
    let (server, endpoint) = serve().await;
    let mut client = RouteDiscoveryClient::connect(endpoint, ApiVersion::V3)
        .await
        .unwrap();

    let status = client.fetch(hello("envoy-1")).await.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    server.shutdown().await;
}
