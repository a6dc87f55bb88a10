//! Registry trait for reading and writing application version tags

#[cfg(test)]
use mockall::automock;

use crate::version::error::RegistryError;
use crate::version::types::{ApplicationVersion, ListedVersion, Properties};

/// Boundary to the external version registry.
///
/// The registry is the only source of truth; implementations must not cache
/// across calls.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Lists every version of an application, whatever its release status
    ///
    /// Fields the registry does not return inline are `None` in the listing.
    async fn list_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ListedVersion>, RegistryError>;

    /// Reads status, tag and properties of a single version
    async fn get_version_detail(
        &self,
        application_key: &str,
        version: &str,
    ) -> Result<ApplicationVersion, RegistryError>;

    /// Replaces the tag of a version (idempotent PUT semantics)
    async fn replace_tag(
        &self,
        application_key: &str,
        version: &str,
        tag: &str,
    ) -> Result<(), RegistryError>;

    /// Upserts the given properties, leaving other keys untouched
    async fn upsert_properties(
        &self,
        application_key: &str,
        version: &str,
        properties: &Properties,
    ) -> Result<(), RegistryError>;
}
