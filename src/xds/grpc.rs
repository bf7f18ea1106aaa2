//! gRPC transport for the route discovery service.
//!
//! One generic wrapper is mounted twice, once per API version:
//!
//! - `envoy.api.v2.RouteDiscoveryService`
//! - `envoy.service.route.v3.RouteDiscoveryService`
//!
//! `StreamRoutes` is served by the discovery server's session loop.
//! `DeltaRoutes` and `FetchRoutes` answer `UNIMPLEMENTED`.

use super::proto::{ApiVersion, DiscoveryRequest, DiscoveryResponse, Node};
use super::server::{DiscoveryOperation, DiscoveryServer, ResponseStream};
use crate::core::error::{error_to_status, GatewatchError, GatewatchResult};
use bytes::Bytes;
use std::marker::PhantomData;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::BoxFuture;
use tonic::{Status, Streaming};

/// Compile-time selector for the API version a service instance speaks.
pub trait XdsApi: Clone + Send + Sync + 'static {
    const VERSION: ApiVersion;
    const SERVICE_NAME: &'static str;
}

/// `envoy.api.v2` marker.
#[derive(Debug, Clone, Copy)]
pub struct V2;

impl XdsApi for V2 {
    const VERSION: ApiVersion = ApiVersion::V2;
    const SERVICE_NAME: &'static str = "envoy.api.v2.RouteDiscoveryService";
}

/// `envoy.service.route.v3` marker.
#[derive(Debug, Clone, Copy)]
pub struct V3;

impl XdsApi for V3 {
    const VERSION: ApiVersion = ApiVersion::V3;
    const SERVICE_NAME: &'static str = "envoy.service.route.v3.RouteDiscoveryService";
}

/// Full request path of `operation` on the service for `api`.
pub fn method_path(api: ApiVersion, operation: DiscoveryOperation) -> String {
    format!("/{}/{}", api.service_name(), operation.method())
}

fn parse_operation(service: &str, path: &str) -> Option<DiscoveryOperation> {
    let method = path
        .strip_prefix('/')?
        .strip_prefix(service)?
        .strip_prefix('/')?;
    DiscoveryOperation::from_method(method)
}

/// Tonic service wrapper for one API version.
#[derive(Clone)]
pub struct RouteDiscoveryServer<A: XdsApi> {
    server: DiscoveryServer,
    _api: PhantomData<A>,
}

impl<A: XdsApi> RouteDiscoveryServer<A> {
    pub fn new(server: DiscoveryServer) -> Self {
        Self {
            server,
            _api: PhantomData,
        }
    }
}

impl<A: XdsApi> tonic::server::NamedService for RouteDiscoveryServer<A> {
    const NAME: &'static str = A::SERVICE_NAME;
}

/// Adapter from tonic's streaming handler shape to the discovery server.
struct StreamRoutesSvc {
    server: DiscoveryServer,
    api: ApiVersion,
}

impl tonic::server::StreamingService<DiscoveryRequest> for StreamRoutesSvc {
    type Response = DiscoveryResponse;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<Streaming<DiscoveryRequest>>) -> Self::Future {
        let server = self.server.clone();
        let api = self.api;
        Box::pin(async move {
            let peer = request.remote_addr();
            tracing::debug!(?peer, api = %api, "discovery stream opened");
            let (_, responses) = server
                .open_stream(api, request.into_inner())
                .await
                .map_err(error_to_status)?;
            Ok(tonic::Response::new(responses))
        })
    }
}

impl<A, B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for RouteDiscoveryServer<A>
where
    A: XdsApi,
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let server = self.server.clone();
        match parse_operation(A::SERVICE_NAME, req.uri().path()) {
            Some(DiscoveryOperation::StreamRoutes) => Box::pin(async move {
                let svc = StreamRoutesSvc {
                    server,
                    api: A::VERSION,
                };
                let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                Ok(grpc.streaming(svc, req).await)
            }),
            Some(operation) => {
                let status = error_to_status(server.reject(operation));
                Box::pin(async move { Ok(status.into_http()) })
            }
            None => {
                let path = req.uri().path().to_string();
                Box::pin(async move {
                    Ok(Status::unimplemented(format!("unknown method {path}")).into_http())
                })
            }
        }
    }
}

/// Serve both API versions on `listener` until `shutdown` flips to true.
pub async fn serve(
    server: DiscoveryServer,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> GatewatchResult<()> {
    use tonic::transport::Server;

    let addr = listener.local_addr().ok();
    tracing::info!(?addr, "starting route discovery gRPC server");

    Server::builder()
        .add_service(RouteDiscoveryServer::<V2>::new(server.clone()))
        .add_service(RouteDiscoveryServer::<V3>::new(server))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            tracing::info!("gRPC listener no longer accepting streams");
        })
        .await
        .map_err(|e| GatewatchError::Internal {
            message: format!("gRPC server error: {}", e),
        })
}

// ============================================================================
// Client
// ============================================================================

/// Minimal route discovery client, used by `gatewatch probe` and tests.
pub struct RouteDiscoveryClient {
    inner: tonic::client::Grpc<tonic::transport::Channel>,
    api: ApiVersion,
}

/// An open subscription: requests go out on `requests`, configuration comes
/// back on `responses`.
pub struct Subscription {
    pub requests: mpsc::Sender<DiscoveryRequest>,
    pub responses: Streaming<DiscoveryResponse>,
}

impl Subscription {
    /// Wait for the next configuration push.
    pub async fn next_response(&mut self) -> Result<Option<DiscoveryResponse>, Status> {
        self.responses.message().await
    }

    /// Acknowledge `response`.
    pub async fn ack(&self, node: &Node, response: &DiscoveryResponse) -> bool {
        let request = DiscoveryRequest {
            version_info: response.version_info.clone(),
            node: Some(node.clone()),
            type_url: response.type_url.clone(),
            response_nonce: response.nonce.clone(),
            ..Default::default()
        };
        self.requests.send(request).await.is_ok()
    }
}

impl RouteDiscoveryClient {
    /// Connect to `endpoint`, e.g. `http://127.0.0.1:9876`.
    pub async fn connect(endpoint: String, api: ApiVersion) -> Result<Self, Status> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint)
            .map_err(|e| Status::invalid_argument(format!("invalid endpoint: {}", e)))?
            .connect()
            .await
            .map_err(|e| Status::unavailable(format!("connect failed: {}", e)))?;
        Ok(Self::from_channel(channel, api))
    }

    pub fn from_channel(channel: tonic::transport::Channel, api: ApiVersion) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
            api,
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {}", e)))
    }

    fn path(&self, operation: DiscoveryOperation) -> Result<PathAndQuery, Status> {
        method_path(self.api, operation)
            .parse()
            .map_err(|_| Status::internal("invalid method path"))
    }

    /// Open a route stream and send `first` as its initial request.
    pub async fn subscribe(&mut self, first: DiscoveryRequest) -> Result<Subscription, Status> {
        self.ready().await?;
        let path = self.path(DiscoveryOperation::StreamRoutes)?;

        let (requests, rx) = mpsc::channel(4);
        requests
            .send(first)
            .await
            .map_err(|_| Status::internal("request channel closed"))?;

        let codec = tonic::codec::ProstCodec::<DiscoveryRequest, DiscoveryResponse>::default();
        let responses = self
            .inner
            .streaming(tonic::Request::new(ReceiverStream::new(rx)), path, codec)
            .await?
            .into_inner();
        Ok(Subscription {
            requests,
            responses,
        })
    }

    /// Issue a unary fetch.
    pub async fn fetch(&mut self, request: DiscoveryRequest) -> Result<DiscoveryResponse, Status> {
        self.ready().await?;
        let path = self.path(DiscoveryOperation::FetchRoutes)?;
        let codec = tonic::codec::ProstCodec::<DiscoveryRequest, DiscoveryResponse>::default();
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
            .map(tonic::Response::into_inner)
    }
}

/// Local address a bound listener will serve on.
pub fn listener_addr(listener: &TcpListener) -> GatewatchResult<SocketAddr> {
    listener.local_addr().map_err(|e| GatewatchError::Internal {
        message: format!("listener address unavailable: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_paths() {
        assert_eq!(
            method_path(ApiVersion::V2, DiscoveryOperation::StreamRoutes),
            "/envoy.api.v2.RouteDiscoveryService/StreamRoutes"
        );
        assert_eq!(
            method_path(ApiVersion::V3, DiscoveryOperation::FetchRoutes),
            "/envoy.service.route.v3.RouteDiscoveryService/FetchRoutes"
        );
    }

    #[test]
    fn test_parse_operation() {
        let service = V3::SERVICE_NAME;
        assert_eq!(
            parse_operation(service, &method_path(ApiVersion::V3, DiscoveryOperation::DeltaRoutes)),
            Some(DiscoveryOperation::DeltaRoutes)
        );
        assert_eq!(
            parse_operation(service, "/envoy.api.v2.RouteDiscoveryService/StreamRoutes"),
            None
        );
        assert_eq!(parse_operation(service, "/"), None);
    }

    #[test]
    fn test_service_names_match_api_versions() {
        assert_eq!(V2::SERVICE_NAME, ApiVersion::V2.service_name());
        assert_eq!(V3::SERVICE_NAME, ApiVersion::V3.service_name());
    }
}
