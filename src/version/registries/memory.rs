//! In-memory registry simulation
//!
//! Holds version records per application in creation order and supports
//! fault injection, so transitions can be replayed without a live registry.
//! Listings come back newest first, like AppTrust's `order_by=created`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::{ApplicationVersion, ListedVersion, Properties, ReleaseStatus};

#[derive(Debug, Default)]
struct State {
    applications: HashMap<String, Vec<ApplicationVersion>>,
    failing_tag_writes: HashSet<(String, String)>,
    tag_writes: usize,
    property_writes: usize,
}

/// Simulated registry backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a version tagged with its own version string.
    pub fn with_version(self, application_key: &str, version: &str, status: ReleaseStatus) -> Self {
        self.insert(ApplicationVersion::new(application_key, version, status));
        self
    }

    /// Builder-style insert of a version carrying `tag`.
    pub fn with_tagged_version(
        self,
        application_key: &str,
        version: &str,
        status: ReleaseStatus,
        tag: &str,
    ) -> Self {
        self.insert(ApplicationVersion::new(application_key, version, status).with_tag(tag));
        self
    }

    /// Append a record. A second record with the same version string is kept
    /// as a duplicate, the way an inconsistent registry would list it.
    pub fn insert(&self, version: ApplicationVersion) {
        self.lock()
            .applications
            .entry(version.application_key.clone())
            .or_default()
            .push(version);
    }

    /// Make every subsequent tag write to this version fail with 403.
    pub fn fail_tag_writes_for(&self, application_key: &str, version: &str) {
        self.lock()
            .failing_tag_writes
            .insert((application_key.to_string(), version.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failing_tag_writes.clear();
    }

    pub fn tag_of(&self, application_key: &str, version: &str) -> Option<String> {
        self.record(application_key, version).map(|v| v.tag)
    }

    pub fn properties_of(&self, application_key: &str, version: &str) -> Option<Properties> {
        self.record(application_key, version).map(|v| v.properties)
    }

    /// Versions currently tagged `latest`, in registry order.
    pub fn latest_holders(&self, application_key: &str) -> Vec<String> {
        self.lock()
            .applications
            .get(application_key)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|v| v.is_latest())
                    .map(|v| v.version.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of all records of an application.
    pub fn snapshot(&self, application_key: &str) -> Vec<ApplicationVersion> {
        self.lock()
            .applications
            .get(application_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of write calls received: `(tag writes, property writes)`.
    pub fn write_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.tag_writes, state.property_writes)
    }

    fn record(&self, application_key: &str, version: &str) -> Option<ApplicationVersion> {
        self.lock()
            .applications
            .get(application_key)?
            .iter()
            .find(|v| v.version == version)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(application_key: &str, version: &str) -> RegistryError {
    RegistryError::NotFound(format!("{application_key}/{version}"))
}

#[async_trait::async_trait]
impl Registry for InMemoryRegistry {
    async fn list_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ListedVersion>, RegistryError> {
        let state = self.lock();
        let versions = state
            .applications
            .get(application_key)
            .ok_or_else(|| RegistryError::NotFound(application_key.to_string()))?;
        Ok(versions.iter().rev().cloned().map(ListedVersion::from).collect())
    }

    async fn get_version_detail(
        &self,
        application_key: &str,
        version: &str,
    ) -> Result<ApplicationVersion, RegistryError> {
        self.record(application_key, version)
            .ok_or_else(|| not_found(application_key, version))
    }

    async fn replace_tag(
        &self,
        application_key: &str,
        version: &str,
        tag: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        if state
            .failing_tag_writes
            .contains(&(application_key.to_string(), version.to_string()))
        {
            return Err(RegistryError::Forbidden {
                status: 403,
                body: format!("tag writes to {application_key}/{version} are denied"),
            });
        }
        state.tag_writes += 1;

        let mut found = false;
        for record in state
            .applications
            .get_mut(application_key)
            .into_iter()
            .flatten()
            .filter(|v| v.version == version)
        {
            record.tag = tag.to_string();
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(not_found(application_key, version))
        }
    }

    async fn upsert_properties(
        &self,
        application_key: &str,
        version: &str,
        properties: &Properties,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.property_writes += 1;

        let mut found = false;
        for record in state
            .applications
            .get_mut(application_key)
            .into_iter()
            .flatten()
            .filter(|v| v.version == version)
        {
            record.properties.merge(properties);
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(not_found(application_key, version))
        }
    }
}
