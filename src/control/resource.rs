//! Routing resources and the events that change them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a routing resource: name and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub name: String,
    pub namespace: String,
}

impl ResourceKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.namespace)
    }
}

/// A named, namespaced gateway object carrying routing annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingResource {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl RoutingResource {
    /// Create a resource without annotations.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style annotation setter.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Identity key of this resource.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.name.clone(), self.namespace.clone())
    }

    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// A change delivered by the upstream watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A resource appeared. Adding an existing identity replaces it.
    Add(RoutingResource),
    /// A resource changed; the new value replaces the old one wholesale.
    Update(RoutingResource),
    /// A resource went away.
    Delete(ResourceKey),
}

impl ResourceEvent {
    /// Identity of the resource this event touches.
    pub fn key(&self) -> ResourceKey {
        match self {
            Self::Add(resource) | Self::Update(resource) => resource.key(),
            Self::Delete(key) => key.clone(),
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new("edge", "istio-system");
        assert_eq!(key.to_string(), "edge/istio-system");
    }

    #[test]
    fn test_event_key() {
        let resource = RoutingResource::new("edge", "default");
        assert_eq!(
            ResourceEvent::Update(resource.clone()).key(),
            resource.key()
        );
        assert_eq!(ResourceEvent::Delete(resource.key()).kind(), "delete");
    }
}
