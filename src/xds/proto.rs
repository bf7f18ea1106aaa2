//! Protobuf encoding for discovery protocol types.
//!
//! Manual prost::Message implementations for the subset of the xDS API this
//! server speaks, so no proto codegen is needed at build time. Field numbers
//! follow the upstream definitions; the route messages used here have the same
//! numbering in the v2 and v3 APIs.

use bytes::Bytes;
use prost::{DecodeError, Message};

/// Route configuration type URL in the v2 API.
pub const ROUTE_TYPE_URL_V2: &str = "type.googleapis.com/envoy.api.v2.RouteConfiguration";

/// Route configuration type URL in the v3 API.
pub const ROUTE_TYPE_URL_V3: &str =
    "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// Discovery API generation a stream was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V2,
    V3,
}

impl ApiVersion {
    /// Type URL of route configuration resources for this API generation.
    pub fn route_type_url(self) -> &'static str {
        match self {
            Self::V2 => ROUTE_TYPE_URL_V2,
            Self::V3 => ROUTE_TYPE_URL_V3,
        }
    }

    /// Fully-qualified gRPC service name of the route discovery service.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::V2 => "envoy.api.v2.RouteDiscoveryService",
            Self::V3 => "envoy.service.route.v3.RouteDiscoveryService",
        }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V2 => write!(f, "v2"),
            Self::V3 => write!(f, "v3"),
        }
    }
}

// ============================================================================
// Any
// ============================================================================

/// Wire-format google.protobuf.Any.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Any {
    pub type_url: String, // field 1
    pub value: Bytes,     // field 2
}

impl Any {
    /// Encode `msg` and wrap it with the given type URL.
    pub fn pack<M: Message>(type_url: &str, msg: &M) -> Self {
        Self {
            type_url: type_url.to_string(),
            value: Bytes::from(msg.encode_to_vec()),
        }
    }

    /// Decode the wrapped message.
    pub fn unpack<M: Message + Default>(&self) -> Result<M, DecodeError> {
        M::decode(self.value.clone())
    }
}

impl Message for Any {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.type_url.is_empty() {
            prost::encoding::string::encode(1, &self.type_url, buf);
        }
        if !self.value.is_empty() {
            prost::encoding::bytes::encode(2, &self.value, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.type_url, buf, ctx),
            2 => prost::encoding::bytes::merge(wire_type, &mut self.value, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.type_url.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.type_url);
        }
        if !self.value.is_empty() {
            len += prost::encoding::bytes::encoded_len(2, &self.value);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// RpcStatus
// ============================================================================

/// Wire-format google.rpc.Status, carried by NACKs in `error_detail`.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct RpcStatus {
    pub code: i32,       // field 1
    pub message: String, // field 2
}

impl Message for RpcStatus {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if self.code != 0 {
            prost::encoding::int32::encode(1, &self.code, buf);
        }
        if !self.message.is_empty() {
            prost::encoding::string::encode(2, &self.message, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::int32::merge(wire_type, &mut self.code, buf, ctx),
            2 => prost::encoding::string::merge(wire_type, &mut self.message, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.code != 0 {
            len += prost::encoding::int32::encoded_len(1, &self.code);
        }
        if !self.message.is_empty() {
            len += prost::encoding::string::encoded_len(2, &self.message);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Node
// ============================================================================

/// Wire-format Node identifying the proxy. Metadata, locality and build
/// information are skipped on decode.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Node {
    pub id: String,      // field 1
    pub cluster: String, // field 2
}

impl Message for Node {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.id.is_empty() {
            prost::encoding::string::encode(1, &self.id, buf);
        }
        if !self.cluster.is_empty() {
            prost::encoding::string::encode(2, &self.cluster, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.id, buf, ctx),
            2 => prost::encoding::string::merge(wire_type, &mut self.cluster, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.id.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.id);
        }
        if !self.cluster.is_empty() {
            len += prost::encoding::string::encoded_len(2, &self.cluster);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// DiscoveryRequest
// ============================================================================

/// Wire-format DiscoveryRequest.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct DiscoveryRequest {
    pub version_info: String,            // field 1
    pub node: Option<Node>,              // field 2
    pub resource_names: Vec<String>,     // field 3
    pub type_url: String,                // field 4
    pub response_nonce: String,          // field 5
    pub error_detail: Option<RpcStatus>, // field 6
}

impl DiscoveryRequest {
    /// A request carrying `error_detail` rejects the last response (NACK).
    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

impl Message for DiscoveryRequest {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.version_info.is_empty() {
            prost::encoding::string::encode(1, &self.version_info, buf);
        }
        if let Some(ref node) = self.node {
            prost::encoding::message::encode(2, node, buf);
        }
        prost::encoding::string::encode_repeated(3, &self.resource_names, buf);
        if !self.type_url.is_empty() {
            prost::encoding::string::encode(4, &self.type_url, buf);
        }
        if !self.response_nonce.is_empty() {
            prost::encoding::string::encode(5, &self.response_nonce, buf);
        }
        if let Some(ref error_detail) = self.error_detail {
            prost::encoding::message::encode(6, error_detail, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.version_info, buf, ctx),
            2 => {
                let mut node = self.node.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut node, buf, ctx)?;
                self.node = Some(node);
                Ok(())
            }
            3 => prost::encoding::string::merge_repeated(
                wire_type,
                &mut self.resource_names,
                buf,
                ctx,
            ),
            4 => prost::encoding::string::merge(wire_type, &mut self.type_url, buf, ctx),
            5 => prost::encoding::string::merge(wire_type, &mut self.response_nonce, buf, ctx),
            6 => {
                let mut status = self.error_detail.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut status, buf, ctx)?;
                self.error_detail = Some(status);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.version_info.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.version_info);
        }
        if let Some(ref node) = self.node {
            len += prost::encoding::message::encoded_len(2, node);
        }
        len += prost::encoding::string::encoded_len_repeated(3, &self.resource_names);
        if !self.type_url.is_empty() {
            len += prost::encoding::string::encoded_len(4, &self.type_url);
        }
        if !self.response_nonce.is_empty() {
            len += prost::encoding::string::encoded_len(5, &self.response_nonce);
        }
        if let Some(ref error_detail) = self.error_detail {
            len += prost::encoding::message::encoded_len(6, error_detail);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// DiscoveryResponse
// ============================================================================

/// Wire-format DiscoveryResponse.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct DiscoveryResponse {
    pub version_info: String, // field 1
    pub resources: Vec<Any>,  // field 2
    pub canary: bool,         // field 3
    pub type_url: String,     // field 4
    pub nonce: String,        // field 5
}

impl Message for DiscoveryResponse {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.version_info.is_empty() {
            prost::encoding::string::encode(1, &self.version_info, buf);
        }
        for resource in &self.resources {
            prost::encoding::message::encode(2, resource, buf);
        }
        if self.canary {
            prost::encoding::bool::encode(3, &self.canary, buf);
        }
        if !self.type_url.is_empty() {
            prost::encoding::string::encode(4, &self.type_url, buf);
        }
        if !self.nonce.is_empty() {
            prost::encoding::string::encode(5, &self.nonce, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.version_info, buf, ctx),
            2 => {
                let mut resource = Any::default();
                prost::encoding::message::merge(wire_type, &mut resource, buf, ctx)?;
                self.resources.push(resource);
                Ok(())
            }
            3 => prost::encoding::bool::merge(wire_type, &mut self.canary, buf, ctx),
            4 => prost::encoding::string::merge(wire_type, &mut self.type_url, buf, ctx),
            5 => prost::encoding::string::merge(wire_type, &mut self.nonce, buf, ctx),
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.version_info.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.version_info);
        }
        for resource in &self.resources {
            len += prost::encoding::message::encoded_len(2, resource);
        }
        if self.canary {
            len += prost::encoding::bool::encoded_len(3, &self.canary);
        }
        if !self.type_url.is_empty() {
            len += prost::encoding::string::encoded_len(4, &self.type_url);
        }
        if !self.nonce.is_empty() {
            len += prost::encoding::string::encoded_len(5, &self.nonce);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// RouteConfiguration
// ============================================================================

/// Wire-format RouteConfiguration.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct RouteConfiguration {
    pub name: String,                    // field 1
    pub virtual_hosts: Vec<VirtualHost>, // field 2
}

impl Message for RouteConfiguration {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.name.is_empty() {
            prost::encoding::string::encode(1, &self.name, buf);
        }
        for vhost in &self.virtual_hosts {
            prost::encoding::message::encode(2, vhost, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.name, buf, ctx),
            2 => {
                let mut vhost = VirtualHost::default();
                prost::encoding::message::merge(wire_type, &mut vhost, buf, ctx)?;
                self.virtual_hosts.push(vhost);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.name.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.name);
        }
        for vhost in &self.virtual_hosts {
            len += prost::encoding::message::encoded_len(2, vhost);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// VirtualHost
// ============================================================================

/// Wire-format VirtualHost.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct VirtualHost {
    pub name: String,         // field 1
    pub domains: Vec<String>, // field 2
    pub routes: Vec<Route>,   // field 3
}

impl Message for VirtualHost {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if !self.name.is_empty() {
            prost::encoding::string::encode(1, &self.name, buf);
        }
        prost::encoding::string::encode_repeated(2, &self.domains, buf);
        for route in &self.routes {
            prost::encoding::message::encode(3, route, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => prost::encoding::string::merge(wire_type, &mut self.name, buf, ctx),
            2 => prost::encoding::string::merge_repeated(wire_type, &mut self.domains, buf, ctx),
            3 => {
                let mut route = Route::default();
                prost::encoding::message::merge(wire_type, &mut route, buf, ctx)?;
                self.routes.push(route);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if !self.name.is_empty() {
            len += prost::encoding::string::encoded_len(1, &self.name);
        }
        len += prost::encoding::string::encoded_len_repeated(2, &self.domains);
        for route in &self.routes {
            len += prost::encoding::message::encoded_len(3, route);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Route
// ============================================================================

/// Wire-format Route. Only the forwarding action (`route`, field 2) of the
/// action oneof is modelled.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Route {
    pub r#match: Option<RouteMatch>, // field 1
    pub route: Option<RouteAction>,  // field 2
}

impl Message for Route {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref route_match) = self.r#match {
            prost::encoding::message::encode(1, route_match, buf);
        }
        if let Some(ref action) = self.route {
            prost::encoding::message::encode(2, action, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut route_match = self.r#match.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut route_match, buf, ctx)?;
                self.r#match = Some(route_match);
                Ok(())
            }
            2 => {
                let mut action = self.route.take().unwrap_or_default();
                prost::encoding::message::merge(wire_type, &mut action, buf, ctx)?;
                self.route = Some(action);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if let Some(ref route_match) = self.r#match {
            len += prost::encoding::message::encoded_len(1, route_match);
        }
        if let Some(ref action) = self.route {
            len += prost::encoding::message::encoded_len(2, action);
        }
        len
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// RouteMatch
// ============================================================================

/// Wire-format RouteMatch. `prefix` is a member of the path_specifier oneof,
/// so it is encoded whenever set, even when empty.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct RouteMatch {
    pub prefix: Option<String>, // field 1
}

impl Message for RouteMatch {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref prefix) = self.prefix {
            prost::encoding::string::encode(1, prefix, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut prefix = self.prefix.take().unwrap_or_default();
                prost::encoding::string::merge(wire_type, &mut prefix, buf, ctx)?;
                self.prefix = Some(prefix);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        self.prefix
            .as_ref()
            .map(|prefix| prost::encoding::string::encoded_len(1, prefix))
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// RouteAction
// ============================================================================

/// Wire-format RouteAction. `cluster` is a member of the cluster_specifier
/// oneof.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct RouteAction {
    pub cluster: Option<String>, // field 1
}

impl Message for RouteAction {
    fn encode_raw(&self, buf: &mut impl prost::bytes::BufMut)
    where
        Self: Sized,
    {
        if let Some(ref cluster) = self.cluster {
            prost::encoding::string::encode(1, cluster, buf);
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: prost::encoding::WireType,
        buf: &mut impl prost::bytes::Buf,
        ctx: prost::encoding::DecodeContext,
    ) -> Result<(), DecodeError>
    where
        Self: Sized,
    {
        match tag {
            1 => {
                let mut cluster = self.cluster.take().unwrap_or_default();
                prost::encoding::string::merge(wire_type, &mut cluster, buf, ctx)?;
                self.cluster = Some(cluster);
                Ok(())
            }
            _ => prost::encoding::skip_field(wire_type, tag, buf, ctx),
        }
    }

    fn encoded_len(&self) -> usize {
        self.cluster
            .as_ref()
            .map(|cluster| prost::encoding::string::encoded_len(1, cluster))
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_match_wire_bytes() {
        let route_match = RouteMatch {
            prefix: Some("/".to_string()),
        };
        assert_eq!(route_match.encode_to_vec(), vec![0x0a, 0x01, b'/']);
    }

    #[test]
    fn test_empty_prefix_still_selects_oneof() {
        let route_match = RouteMatch {
            prefix: Some(String::new()),
        };
        assert_eq!(route_match.encode_to_vec(), vec![0x0a, 0x00]);
        let decoded = RouteMatch::decode(&[0x0a, 0x00][..]).unwrap();
        assert_eq!(decoded.prefix.as_deref(), Some(""));
    }

    #[test]
    fn test_request_skips_unknown_node_fields() {
        // Node { id: "n", cluster: "c", user_agent_name (6): "envoy" }
        let node_bytes = [
            0x0a, 0x01, b'n', 0x12, 0x01, b'c', 0x32, 0x05, b'e', b'n', b'v', b'o', b'y',
        ];
        let mut request = vec![0x12, node_bytes.len() as u8];
        request.extend_from_slice(&node_bytes);

        let decoded = DiscoveryRequest::decode(request.as_slice()).unwrap();
        let node = decoded.node.unwrap();
        assert_eq!(node.id, "n");
        assert_eq!(node.cluster, "c");
    }

    #[test]
    fn test_nack_detection() {
        let ack = DiscoveryRequest {
            response_nonce: "1".to_string(),
            ..Default::default()
        };
        assert!(!ack.is_nack());

        let nack = DiscoveryRequest {
            response_nonce: "1".to_string(),
            error_detail: Some(RpcStatus {
                code: 3,
                message: "bad route".to_string(),
            }),
            ..Default::default()
        };
        let decoded = DiscoveryRequest::decode(nack.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.is_nack());
        assert_eq!(decoded.error_detail.unwrap().message, "bad route");
    }

    #[test]
    fn test_any_pack_unpack() {
        let config = RouteConfiguration {
            name: "rds_config_name".to_string(),
            virtual_hosts: vec![],
        };
        let any = Any::pack(ROUTE_TYPE_URL_V3, &config);
        assert_eq!(any.type_url, ROUTE_TYPE_URL_V3);
        assert_eq!(any.unpack::<RouteConfiguration>().unwrap(), config);
    }
}
