//! Registry test utilities

use std::sync::Arc;

use apptag_reconciler::config::PolicyConfig;
use apptag_reconciler::tags::{Reconciler, TagStateManager};
use apptag_reconciler::version::registries::InMemoryRegistry;
use apptag_reconciler::version::types::{
    ApplicationVersion, LATEST_TAG, PropertyKey, ReleaseStatus,
};

pub const APP: &str = "inventory";

/// Registry holding `(version, tag)` pairs of [`APP`], all released.
pub fn released_registry(versions: &[(&str, &str)]) -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    for (version, tag) in versions {
        registry.insert(ApplicationVersion::new(APP, version, ReleaseStatus::Released).with_tag(tag));
    }
    Arc::new(registry)
}

/// A released version of [`APP`] holding `latest` with a backup of its
/// previous tag.
pub fn latest_with_backup(version: &str, backup: &str) -> ApplicationVersion {
    ApplicationVersion::new(APP, version, ReleaseStatus::Released)
        .with_tag(LATEST_TAG)
        .with_property(PropertyKey::OriginalTagBeforeLatest, backup)
}

pub fn manager(registry: &Arc<InMemoryRegistry>) -> TagStateManager {
    TagStateManager::new(registry.clone(), PolicyConfig::default())
}

pub fn reconciler(registry: &Arc<InMemoryRegistry>) -> Reconciler {
    Reconciler::new(Arc::new(manager(registry)))
}

pub fn tag(registry: &InMemoryRegistry, version: &str) -> String {
    registry
        .tag_of(APP, version)
        .unwrap_or_else(|| panic!("{version} not in registry"))
}

pub fn assert_at_most_one_latest(registry: &InMemoryRegistry) {
    let holders = registry.latest_holders(APP);
    assert!(holders.len() <= 1, "multiple latest holders: {holders:?}");
}
