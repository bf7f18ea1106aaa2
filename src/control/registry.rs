//! Authoritative set of routing resources.
//!
//! The registry itself is a plain data structure; callers serialize access to
//! it (the discovery server keeps it behind its transaction lock). Snapshots
//! share the stored resources through `Arc`, so taking one is cheap and never
//! observes a later mutation.

use super::resource::{ResourceEvent, ResourceKey, RoutingResource};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the current routing resources keyed by identity.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: HashMap<ResourceKey, Arc<RoutingResource>>,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A resource with a new identity was stored.
    Inserted,
    /// An existing resource was replaced.
    Replaced,
    /// A resource was removed.
    Removed,
    /// Delete of an identity that was not present.
    Absent,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an add, update or delete event.
    ///
    /// Add and Update both upsert by identity. Deleting an unknown identity is
    /// a no-op.
    pub fn apply(&mut self, event: ResourceEvent) -> ApplyOutcome {
        match event {
            ResourceEvent::Add(resource) | ResourceEvent::Update(resource) => {
                match self.resources.insert(resource.key(), Arc::new(resource)) {
                    Some(_) => ApplyOutcome::Replaced,
                    None => ApplyOutcome::Inserted,
                }
            }
            ResourceEvent::Delete(key) => match self.resources.remove(&key) {
                Some(_) => ApplyOutcome::Removed,
                None => ApplyOutcome::Absent,
            },
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&RoutingResource> {
        self.resources.get(key).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Copy the current resource set into an immutable snapshot, ordered by
    /// identity.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut resources: Vec<_> = self.resources.values().cloned().collect();
        resources.sort_by(|a, b| {
            (a.name.as_str(), a.namespace.as_str()).cmp(&(b.name.as_str(), b.namespace.as_str()))
        });
        RegistrySnapshot { resources }
    }
}

/// Read-only view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    resources: Vec<Arc<RoutingResource>>,
}

impl RegistrySnapshot {
    /// Build a snapshot directly from resources.
    pub fn from_resources(resources: impl IntoIterator<Item = RoutingResource>) -> Self {
        Self {
            resources: resources.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingResource> {
        self.resources.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(name: &str, host: &str) -> RoutingResource {
        RoutingResource::new(name, "default").with_annotation("host", host)
    }

    #[test]
    fn test_add_then_update_replaces() {
        let mut registry = ResourceRegistry::new();
        assert_eq!(
            registry.apply(ResourceEvent::Add(gateway("a", "one.com"))),
            ApplyOutcome::Inserted
        );
        let replacement = RoutingResource::new("a", "default").with_annotation("other", "x");
        assert_eq!(
            registry.apply(ResourceEvent::Update(replacement.clone())),
            ApplyOutcome::Replaced
        );

        let stored = registry.get(&replacement.key()).unwrap();
        assert_eq!(stored, &replacement);
        assert!(stored.annotation("host").is_none());
    }

    #[test]
    fn test_duplicate_add_behaves_as_update() {
        let mut registry = ResourceRegistry::new();
        registry.apply(ResourceEvent::Add(gateway("a", "one.com")));
        registry.apply(ResourceEvent::Add(gateway("a", "two.com")));

        assert_eq!(registry.len(), 1);
        let key = ResourceKey::new("a", "default");
        assert_eq!(registry.get(&key).unwrap().annotation("host"), Some("two.com"));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut registry = ResourceRegistry::new();
        registry.apply(ResourceEvent::Add(gateway("a", "one.com")));
        assert_eq!(
            registry.apply(ResourceEvent::Delete(ResourceKey::new("b", "default"))),
            ApplyOutcome::Absent
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_name_different_namespace() {
        let mut registry = ResourceRegistry::new();
        registry.apply(ResourceEvent::Add(RoutingResource::new("a", "ns1")));
        registry.apply(ResourceEvent::Add(RoutingResource::new("a", "ns2")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutation() {
        let mut registry = ResourceRegistry::new();
        registry.apply(ResourceEvent::Add(gateway("a", "one.com")));
        let snapshot = registry.snapshot();

        registry.apply(ResourceEvent::Delete(ResourceKey::new("a", "default")));
        registry.apply(ResourceEvent::Add(gateway("b", "two.com")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.iter().next().unwrap().name, "a");
        assert_eq!(registry.snapshot().iter().next().unwrap().name, "b");
    }
}
