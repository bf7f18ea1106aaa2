//! Translation of registry snapshots into route configuration.
//!
//! Each resource carrying both a hostname and a cluster annotation becomes one
//! virtual host with a single prefix route forwarding to that cluster:
//!
//! ```text
//! name: rds_config_name
//! virtual_hosts:
//! - name: <name>-<namespace>
//!   domains: [<hostname annotation split on ','>]
//!   routes:
//!   - match: { prefix: <prefix annotation or "/"> }
//!     route: { cluster: <cluster annotation> }
//! ```
//!
//! Resources missing either required annotation are skipped without error.

use super::registry::RegistrySnapshot;
use super::resource::RoutingResource;
use crate::core::config::AnnotationConfig;
use crate::xds::proto::{
    Any, ApiVersion, DiscoveryResponse, Route, RouteAction, RouteConfiguration, RouteMatch,
    VirtualHost,
};
use bytes::Bytes;
use prost::Message;
use serde::Serialize;

/// Prefix used when a resource has no prefix annotation.
pub const DEFAULT_PATH_PREFIX: &str = "/";

/// Routing intent extracted from one resource's annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    /// Virtual host name, unique per resource identity.
    pub name: String,
    pub external_hostnames: Vec<String>,
    pub target_cluster: String,
    pub path_prefix: String,
}

impl RouteDescriptor {
    /// Extract a descriptor, or `None` when hostname or cluster is absent.
    pub fn from_resource(resource: &RoutingResource, keys: &AnnotationConfig) -> Option<Self> {
        let external_hostnames: Vec<String> = resource
            .annotation(&keys.hostname)?
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect();
        if external_hostnames.is_empty() {
            return None;
        }

        let target_cluster = resource.annotation(&keys.cluster)?.trim();
        if target_cluster.is_empty() {
            return None;
        }

        let path_prefix = resource
            .annotation(&keys.prefix)
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(DEFAULT_PATH_PREFIX);

        Some(Self {
            name: format!("{}-{}", resource.name, resource.namespace),
            external_hostnames,
            target_cluster: target_cluster.to_string(),
            path_prefix: path_prefix.to_string(),
        })
    }

    /// Render as a virtual host with one prefix route.
    pub fn to_virtual_host(&self) -> VirtualHost {
        VirtualHost {
            name: self.name.clone(),
            domains: self.external_hostnames.clone(),
            routes: vec![Route {
                r#match: Some(RouteMatch {
                    prefix: Some(self.path_prefix.clone()),
                }),
                route: Some(RouteAction {
                    cluster: Some(self.target_cluster.clone()),
                }),
            }],
        }
    }
}

/// Translated configuration for one registry version.
///
/// The route configuration is encoded once; every session renders its own
/// response from the shared bytes.
#[derive(Debug, Clone)]
pub struct ConfigurationPayload {
    version: u64,
    route_configuration: RouteConfiguration,
    encoded: Bytes,
}

impl ConfigurationPayload {
    pub fn new(version: u64, route_configuration: RouteConfiguration) -> Self {
        let encoded = Bytes::from(route_configuration.encode_to_vec());
        Self {
            version,
            route_configuration,
            encoded,
        }
    }

    /// Registry version this payload was produced from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn route_configuration(&self) -> &RouteConfiguration {
        &self.route_configuration
    }

    /// Number of virtual hosts in the route configuration.
    pub fn virtual_host_count(&self) -> usize {
        self.route_configuration.virtual_hosts.len()
    }

    /// Build the wire response for a stream on `api` with the given nonce.
    pub fn to_response(&self, api: ApiVersion, nonce: String) -> DiscoveryResponse {
        DiscoveryResponse {
            version_info: self.version.to_string(),
            resources: vec![Any {
                type_url: api.route_type_url().to_string(),
                value: self.encoded.clone(),
            }],
            canary: false,
            type_url: api.route_type_url().to_string(),
            nonce,
        }
    }
}

/// Stateless translator from registry snapshots to route configuration.
#[derive(Debug, Clone)]
pub struct RouteTranslator {
    route_config_name: String,
    annotations: AnnotationConfig,
}

impl RouteTranslator {
    pub fn new(route_config_name: impl Into<String>, annotations: AnnotationConfig) -> Self {
        Self {
            route_config_name: route_config_name.into(),
            annotations,
        }
    }

    pub fn route_config_name(&self) -> &str {
        &self.route_config_name
    }

    /// Descriptors for every resource that passes the annotation filter, in
    /// snapshot order.
    pub fn descriptors(&self, snapshot: &RegistrySnapshot) -> Vec<RouteDescriptor> {
        snapshot
            .iter()
            .filter_map(|resource| {
                let descriptor = RouteDescriptor::from_resource(resource, &self.annotations);
                if descriptor.is_none() {
                    tracing::trace!(
                        resource = %resource.key(),
                        "resource lacks routing annotations, skipped"
                    );
                }
                descriptor
            })
            .collect()
    }

    /// Translate a snapshot into the payload for `version`.
    ///
    /// Always yields exactly one route configuration, empty when no resource
    /// qualifies, so clients drop routes of deleted resources.
    pub fn translate(&self, snapshot: &RegistrySnapshot, version: u64) -> ConfigurationPayload {
        let virtual_hosts = self
            .descriptors(snapshot)
            .iter()
            .map(RouteDescriptor::to_virtual_host)
            .collect();

        ConfigurationPayload::new(
            version,
            RouteConfiguration {
                name: self.route_config_name.clone(),
                virtual_hosts,
            },
        )
    }
}

impl Default for RouteTranslator {
    fn default() -> Self {
        Self::new("rds_config_name", AnnotationConfig::default())
    }
}
