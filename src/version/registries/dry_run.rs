//! Registry decorator that logs writes instead of issuing them

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::{ApplicationVersion, ListedVersion, Properties};

/// A write that would have been sent to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedWrite {
    ReplaceTag {
        application_key: String,
        version: String,
        tag: String,
    },
    UpsertProperties {
        application_key: String,
        version: String,
        properties: Properties,
    },
}

#[derive(Debug, Default)]
struct Overlay {
    tag: Option<String>,
    properties: Properties,
}

#[derive(Debug, Default)]
struct State {
    overlays: HashMap<(String, String), Overlay>,
    planned: Vec<PlannedWrite>,
}

/// Forwards reads to the wrapped registry and keeps writes local.
///
/// Suppressed writes are layered over later reads, so a multi-step
/// transition plans the same follow-up writes it would issue for real.
pub struct DryRunRegistry {
    inner: Arc<dyn Registry>,
    state: Mutex<State>,
}

impl DryRunRegistry {
    pub fn new(inner: Arc<dyn Registry>) -> Self {
        Self {
            inner,
            state: Mutex::new(State::default()),
        }
    }

    /// Writes suppressed so far, in issue order.
    pub fn planned_writes(&self) -> Vec<PlannedWrite> {
        self.lock().planned.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_overlay(&self, application_key: &str, version: &mut ApplicationVersion) {
        let state = self.lock();
        if let Some(overlay) = state
            .overlays
            .get(&(application_key.to_string(), version.version.clone()))
        {
            if let Some(tag) = &overlay.tag {
                version.tag = tag.clone();
            }
            version.properties.merge(&overlay.properties);
        }
    }
}

#[async_trait::async_trait]
impl Registry for DryRunRegistry {
    async fn list_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ListedVersion>, RegistryError> {
        let mut listing = self.inner.list_versions(application_key).await?;
        let state = self.lock();
        for entry in &mut listing {
            let Some(overlay) = state
                .overlays
                .get(&(application_key.to_string(), entry.version.clone()))
            else {
                continue;
            };
            if let Some(tag) = &overlay.tag {
                entry.tag = Some(tag.clone());
            }
            if let Some(properties) = &mut entry.properties {
                properties.merge(&overlay.properties);
            }
        }
        Ok(listing)
    }

    async fn get_version_detail(
        &self,
        application_key: &str,
        version: &str,
    ) -> Result<ApplicationVersion, RegistryError> {
        let mut detail = self.inner.get_version_detail(application_key, version).await?;
        self.apply_overlay(application_key, &mut detail);
        Ok(detail)
    }

    async fn replace_tag(
        &self,
        application_key: &str,
        version: &str,
        tag: &str,
    ) -> Result<(), RegistryError> {
        info!(
            target: "apptag::dry_run",
            application_key, version, tag, "[DRY-RUN] replace tag"
        );
        let mut state = self.lock();
        state
            .overlays
            .entry((application_key.to_string(), version.to_string()))
            .or_default()
            .tag = Some(tag.to_string());
        state.planned.push(PlannedWrite::ReplaceTag {
            application_key: application_key.to_string(),
            version: version.to_string(),
            tag: tag.to_string(),
        });
        Ok(())
    }

    async fn upsert_properties(
        &self,
        application_key: &str,
        version: &str,
        properties: &Properties,
    ) -> Result<(), RegistryError> {
        info!(
            target: "apptag::dry_run",
            application_key,
            version,
            properties = ?properties.to_wire(),
            "[DRY-RUN] upsert properties"
        );
        let mut state = self.lock();
        state
            .overlays
            .entry((application_key.to_string(), version.to_string()))
            .or_default()
            .properties
            .merge(properties);
        state.planned.push(PlannedWrite::UpsertProperties {
            application_key: application_key.to_string(),
            version: version.to_string(),
            properties: properties.clone(),
        });
        Ok(())
    }
}
