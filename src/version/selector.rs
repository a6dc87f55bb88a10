//! Production candidate selection
//!
//! Reads the version set of an application fresh from the registry, keeps the
//! production releases with parsable versions, and orders them by descending
//! precedence. The pickers below only ever look at such an ordered slice.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::TieBreakPolicy;
use crate::version::error::{EngineError, RegistryError};
use crate::version::registry::Registry;
use crate::version::semver::{SemVer, bump_patch, max_release};
use crate::version::types::{ApplicationVersion, ReleaseStatus};

pub struct VersionSelector {
    registry: Arc<dyn Registry>,
    tie_break: TieBreakPolicy,
}

impl VersionSelector {
    pub fn new(registry: Arc<dyn Registry>, tie_break: TieBreakPolicy) -> Self {
        Self {
            registry,
            tie_break,
        }
    }

    pub fn tie_break(&self) -> TieBreakPolicy {
        self.tie_break
    }

    /// Every version of the application with status and tag filled in.
    ///
    /// Entries the listing returns without status or tag are completed with a
    /// detail lookup.
    pub async fn all_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ApplicationVersion>, RegistryError> {
        let listing = self.registry.list_versions(application_key).await?;
        let mut versions = Vec::with_capacity(listing.len());

        for entry in listing {
            match entry.into_complete(application_key) {
                Ok(version) => versions.push(version),
                Err(partial) => {
                    debug!(
                        application_key,
                        version = %partial.version,
                        "listing lacks status or tag, fetching detail"
                    );
                    versions.push(
                        self.registry
                            .get_version_detail(application_key, &partial.version)
                            .await?,
                    );
                }
            }
        }

        Ok(versions)
    }

    /// Production releases ordered by descending precedence.
    pub async fn prod_candidates(
        &self,
        application_key: &str,
    ) -> Result<Vec<ApplicationVersion>, RegistryError> {
        let versions = self.all_versions(application_key).await?;
        Ok(prod_candidates_from(versions))
    }

    /// Best successor for `latest`; see [`pick_next_latest`].
    pub fn pick_next_latest<'a>(
        &self,
        candidates: &'a [ApplicationVersion],
        exclude_version: Option<&str>,
    ) -> Option<&'a ApplicationVersion> {
        pick_next_latest(candidates, exclude_version, self.tie_break)
    }

    /// Next application version, whatever the release status of the inputs.
    ///
    /// Bumps PATCH of the most recently created version when it is a plain
    /// `X.Y.Z`, so hotfix lines continue where they left off. Otherwise bumps
    /// the highest plain version, then the `seed` when the application has no
    /// usable version yet.
    pub async fn next_version(
        &self,
        application_key: &str,
        seed: Option<&str>,
    ) -> Result<String, EngineError> {
        let listing = match self.registry.list_versions(application_key).await {
            Ok(listing) => listing,
            Err(RegistryError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        // Listings are ordered newest-created first.
        if let Some(next) = listing.first().and_then(|newest| bump_patch(&newest.version)) {
            return Ok(next);
        }

        if let Some(max) = max_release(listing.iter().map(|v| v.version.as_str())) {
            return bump_patch(max.as_str()).ok_or_else(|| {
                EngineError::Validation(format!(
                    "PATCH of {max} cannot be incremented for application {application_key}"
                ))
            });
        }

        seed.and_then(bump_patch).ok_or_else(|| {
            EngineError::Validation(format!(
                "no released X.Y.Z version and no valid seed for application {application_key}"
            ))
        })
    }
}

/// Keep production releases with parsable versions, sorted descending.
///
/// The sort is stable, so versions of equal precedence keep registry order.
pub fn prod_candidates_from(versions: Vec<ApplicationVersion>) -> Vec<ApplicationVersion> {
    let mut parsed: Vec<(SemVer, ApplicationVersion)> = versions
        .into_iter()
        .filter(|v| v.release_status.is_production())
        .filter_map(|v| match SemVer::parse(&v.version) {
            Some(semver) => Some((semver, v)),
            None => {
                warn!(
                    application_key = %v.application_key,
                    version = %v.version,
                    "excluding unparsable version from production candidates"
                );
                None
            }
        })
        .collect();

    parsed.sort_by(|(a, _), (b, _)| b.cmp(a));
    parsed.into_iter().map(|(_, v)| v).collect()
}

/// Highest candidate, if any.
pub fn pick_top(candidates: &[ApplicationVersion]) -> Option<&ApplicationVersion> {
    candidates.first()
}

/// First candidate that is neither `exclude_version` nor quarantined.
///
/// Among candidates of equal precedence the tie-break policy decides.
/// `None` is a valid outcome: there is no successor.
pub fn pick_next_latest<'a>(
    candidates: &'a [ApplicationVersion],
    exclude_version: Option<&str>,
    tie_break: TieBreakPolicy,
) -> Option<&'a ApplicationVersion> {
    let eligible = candidates
        .iter()
        .filter(|v| Some(v.version.as_str()) != exclude_version)
        .filter(|v| !v.is_quarantined());
    pick_preferred(eligible, tie_break)
}

/// First element of an ordered sequence, with equal-precedence ties resolved
/// by `tie_break`.
pub fn pick_preferred<'a, I>(ordered: I, tie_break: TieBreakPolicy) -> Option<&'a ApplicationVersion>
where
    I: IntoIterator<Item = &'a ApplicationVersion>,
{
    let mut iter = ordered.into_iter();
    let first = iter.next()?;

    if tie_break == TieBreakPolicy::RegistryOrder
        || first.release_status == ReleaseStatus::TrustedRelease
    {
        return Some(first);
    }

    let Some(first_semver) = SemVer::parse(&first.version) else {
        return Some(first);
    };

    let trusted_tie = iter
        .take_while(|v| {
            SemVer::parse(&v.version).is_some_and(|s| s.cmp(&first_semver) == Ordering::Equal)
        })
        .find(|v| v.release_status == ReleaseStatus::TrustedRelease);

    Some(trusted_tie.unwrap_or(first))
}
