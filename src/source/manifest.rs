//! Manifest-file resource source.
//!
//! The manifest lists routing resources in TOML:
//!
//! ```toml
//! [[resource]]
//! name = "edge"
//! namespace = "default"
//!
//! [resource.annotations]
//! "stoakes.github.com/hostname" = "a.com,b.com"
//! "stoakes.github.com/cluster" = "svc1"
//! ```
//!
//! Every resync re-reads the file and diffs it against the previous listing,
//! so only changed resources produce events. A listing that fails to load
//! leaves the previous view in place.

use super::EventSink;
use crate::control::resource::{ResourceEvent, ResourceKey, RoutingResource};
use crate::core::error::GatewatchError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Parsed manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "resource")]
    pub resources: Vec<RoutingResource>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("invalid manifest {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(content)?;
        for resource in &manifest.resources {
            if resource.name.is_empty() || resource.namespace.is_empty() {
                anyhow::bail!("resource must have a name and namespace");
            }
        }
        Ok(manifest)
    }

    /// Resources keyed by identity. Later duplicates replace earlier ones.
    pub fn by_key(&self) -> BTreeMap<ResourceKey, RoutingResource> {
        let mut resources = BTreeMap::new();
        for resource in &self.resources {
            if resources.insert(resource.key(), resource.clone()).is_some() {
                tracing::warn!(
                    resource = %resource.key(),
                    "duplicate resource in manifest, keeping last"
                );
            }
        }
        resources
    }
}

/// Events emitted by one resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added + self.updated + self.deleted == 0
    }
}

/// Lists a manifest file and feeds changes to a sink.
#[derive(Debug)]
pub struct ManifestSource {
    path: PathBuf,
    resync_interval: Duration,
    known: BTreeMap<ResourceKey, RoutingResource>,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>, resync_interval: Duration) -> Self {
        Self {
            path: path.into(),
            resync_interval,
            known: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events that move the previous listing to `listing`.
    ///
    /// Adds and updates come first in identity order, then deletes.
    pub fn diff(&self, listing: &BTreeMap<ResourceKey, RoutingResource>) -> Vec<ResourceEvent> {
        let mut events = Vec::new();
        for (key, resource) in listing {
            match self.known.get(key) {
                None => events.push(ResourceEvent::Add(resource.clone())),
                Some(previous) if previous != resource => {
                    events.push(ResourceEvent::Update(resource.clone()))
                }
                Some(_) => {}
            }
        }
        for key in self.known.keys() {
            if !listing.contains_key(key) {
                events.push(ResourceEvent::Delete(key.clone()));
            }
        }
        events
    }

    /// Re-read the manifest and deliver the delta to `sink`.
    pub fn sync(&mut self, sink: &dyn EventSink) -> Result<SyncReport> {
        let listing = Manifest::from_file(&self.path)?.by_key();
        let mut report = SyncReport::default();

        for event in self.diff(&listing) {
            match &event {
                ResourceEvent::Add(_) => report.added += 1,
                ResourceEvent::Update(_) => report.updated += 1,
                ResourceEvent::Delete(_) => report.deleted += 1,
            }
            sink.notify_change(event)?;
        }

        self.known = listing;
        Ok(report)
    }

    /// Resync on the configured interval until `shutdown` flips to true or the
    /// sink stops accepting events. The first listing happens immediately.
    pub async fn run(mut self, sink: Arc<dyn EventSink>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            manifest = ?self.path,
            interval_ms = self.resync_interval.as_millis() as u64,
            "manifest source started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sync(sink.as_ref()) {
                        Ok(report) if report.is_empty() => {
                            tracing::trace!(manifest = ?self.path, "manifest unchanged");
                        }
                        Ok(report) => {
                            tracing::info!(
                                added = report.added,
                                updated = report.updated,
                                deleted = report.deleted,
                                resources = self.known.len(),
                                "manifest resynced"
                            );
                        }
                        Err(e) if e.downcast_ref::<GatewatchError>().is_some() => {
                            tracing::info!(error = %e, "event sink closed, stopping manifest source");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %format!("{:#}", e),
                                "manifest resync failed, keeping previous listing"
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(manifest = ?self.path, "manifest source stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GatewatchResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ResourceEvent>>,
    }

    impl EventSink for RecordingSink {
        fn notify_change(&self, event: ResourceEvent) -> GatewatchResult<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    const TWO_GATEWAYS: &str = r#"
[[resource]]
name = "edge"
namespace = "default"

[resource.annotations]
"stoakes.github.com/hostname" = "a.com"
"stoakes.github.com/cluster" = "svc1"

[[resource]]
name = "internal"
namespace = "default"
"#;

    fn write_manifest(file: &tempfile::NamedTempFile, content: &str) {
        std::fs::write(file.path(), content).unwrap();
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_toml(TWO_GATEWAYS).unwrap();
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(
            manifest.resources[0].annotation("stoakes.github.com/cluster"),
            Some("svc1")
        );
        assert!(manifest.resources[1].annotations.is_empty());
    }

    #[test]
    fn test_parse_rejects_unnamed_resource() {
        assert!(Manifest::from_toml("[[resource]]\nname = \"\"\nnamespace = \"x\"\n").is_err());
        assert!(Manifest::from_toml("").unwrap().resources.is_empty());
    }

    #[test]
    fn test_first_sync_adds_everything() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_manifest(&file, TWO_GATEWAYS);

        let sink = RecordingSink::default();
        let mut source = ManifestSource::new(file.path(), Duration::from_secs(30));
        let report = source.sync(&sink).unwrap();

        assert_eq!(report.added, 2);
        assert!(sink
            .events
            .lock()
            .iter()
            .all(|event| matches!(event, ResourceEvent::Add(_))));
    }

    #[test]
    fn test_resync_emits_only_delta() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_manifest(&file, TWO_GATEWAYS);

        let sink = RecordingSink::default();
        let mut source = ManifestSource::new(file.path(), Duration::from_secs(30));
        source.sync(&sink).unwrap();
        assert!(source.sync(&sink).unwrap().is_empty());

        write_manifest(
            &file,
            r#"
[[resource]]
name = "edge"
namespace = "default"

[resource.annotations]
"stoakes.github.com/hostname" = "a.com"
"stoakes.github.com/cluster" = "svc2"
"#,
        );
        sink.events.lock().clear();
        let report = source.sync(&sink).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 1);

        let events = sink.events.lock();
        assert!(matches!(&events[0], ResourceEvent::Update(r) if r.name == "edge"));
        assert_eq!(
            events[1],
            ResourceEvent::Delete(ResourceKey::new("internal", "default"))
        );
    }

    #[test]
    fn test_unreadable_manifest_keeps_previous_listing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_manifest(&file, TWO_GATEWAYS);

        let sink = RecordingSink::default();
        let mut source = ManifestSource::new(file.path(), Duration::from_secs(30));
        source.sync(&sink).unwrap();

        write_manifest(&file, "[[resource]\nbroken");
        assert!(source.sync(&sink).is_err());
        assert_eq!(sink.events.lock().len(), 2);

        write_manifest(&file, TWO_GATEWAYS);
        assert!(source.sync(&sink).unwrap().is_empty());
    }
}
