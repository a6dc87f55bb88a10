//! Tag state transitions: promote, rollback and their building blocks
//!
//! Every operation reads the registry before writing and writes only when the
//! value differs, so re-running a transition after a partial failure converges
//! on the same end state instead of stacking changes.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::tags::lock::AppLocks;
use crate::tags::report::{Step, Transition, TransitionFailure, TransitionReport};
use crate::version::error::EngineError;
use crate::version::registry::Registry;
use crate::version::selector::{VersionSelector, pick_top};
use crate::version::semver::SemVer;
use crate::version::types::{
    ApplicationVersion, LATEST_TAG, MAX_TAG_LEN, Properties, PropertyKey, QUARANTINE_TAG,
};

static APPLICATION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$")
        .expect("application key pattern is valid")
});

pub fn validate_application_key(application_key: &str) -> Result<(), EngineError> {
    if APPLICATION_KEY.is_match(application_key) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "invalid application key '{application_key}'"
        )))
    }
}

pub fn validate_version(version: &str) -> Result<SemVer, EngineError> {
    SemVer::parse(version).ok_or_else(|| {
        EngineError::Validation(format!("'{version}' is not a valid semantic version"))
    })
}

fn validate_tag(tag: &str) -> Result<(), EngineError> {
    if tag.chars().count() > MAX_TAG_LEN {
        return Err(EngineError::Validation(format!(
            "tag '{tag}' exceeds {MAX_TAG_LEN} characters"
        )));
    }
    Ok(())
}

/// Applies promote and rollback transitions against a registry.
pub struct TagStateManager {
    registry: Arc<dyn Registry>,
    selector: VersionSelector,
    policy: PolicyConfig,
    locks: Arc<AppLocks>,
}

impl TagStateManager {
    pub fn new(registry: Arc<dyn Registry>, policy: PolicyConfig) -> Self {
        Self {
            selector: VersionSelector::new(registry.clone(), policy.tie_break),
            registry,
            policy,
            locks: Arc::new(AppLocks::new()),
        }
    }

    pub fn selector(&self) -> &VersionSelector {
        &self.selector
    }

    pub(crate) fn locks(&self) -> &AppLocks {
        &self.locks
    }

    /// Tag a restore falls back to for `version` when no backup is usable.
    pub fn fallback_tag<'a>(&self, version: &'a str) -> &'a str {
        self.policy.restore_fallback.tag_for(version)
    }

    /// Make `version` carry `desired`, writing only if it differs.
    pub async fn set_tag(
        &self,
        application_key: &str,
        version: &str,
        desired: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        validate_tag(desired)?;
        let current = self
            .registry
            .get_version_detail(application_key, version)
            .await?;
        self.set_tag_from(application_key, version, &current.tag, desired, steps)
            .await
    }

    /// Back up the current tag under `key`, then set `new_tag`.
    ///
    /// When the tag already equals `new_tag` the backup is skipped, so a retry
    /// never overwrites a genuine backup with `new_tag` itself. Returns the tag
    /// the version carried before the call.
    pub async fn backup_then_set_tag(
        &self,
        application_key: &str,
        version: &str,
        key: PropertyKey,
        new_tag: &str,
        steps: &mut Vec<Step>,
    ) -> Result<String, EngineError> {
        validate_tag(new_tag)?;
        let current = self
            .registry
            .get_version_detail(application_key, version)
            .await?;
        self.backup_then_set_tag_from(&current, key, new_tag, steps)
            .await?;
        Ok(current.tag)
    }

    /// Set the tag back to the value backed up under `key`, or to
    /// `fallback_tag` when the backup is missing, empty or `latest`.
    pub async fn restore_tag_from_property(
        &self,
        application_key: &str,
        version: &str,
        key: PropertyKey,
        fallback_tag: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        let current = self
            .registry
            .get_version_detail(application_key, version)
            .await?;

        let target = match current.properties.get(key) {
            Some(LATEST_TAG) => {
                warn!(
                    application_key,
                    version,
                    property = %key,
                    "backup holds 'latest', restoring fallback tag instead"
                );
                fallback_tag
            }
            Some(backup) if !backup.is_empty() => backup,
            _ => fallback_tag,
        };
        validate_tag(target)?;

        self.set_tag_from(application_key, version, &current.tag, target, steps)
            .await
    }

    pub(crate) async fn set_tag_from(
        &self,
        application_key: &str,
        version: &str,
        current_tag: &str,
        desired: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        if current_tag == desired {
            debug!(application_key, version, tag = desired, "tag already set");
            steps.push(Step::TagUnchanged {
                version: version.to_string(),
                tag: desired.to_string(),
            });
            return Ok(());
        }

        self.registry
            .replace_tag(application_key, version, desired)
            .await?;
        info!(
            application_key,
            version,
            from = current_tag,
            to = desired,
            "tag replaced"
        );
        steps.push(Step::TagReplaced {
            version: version.to_string(),
            from: current_tag.to_string(),
            to: desired.to_string(),
        });
        Ok(())
    }

    pub(crate) async fn backup_then_set_tag_from(
        &self,
        current: &ApplicationVersion,
        key: PropertyKey,
        new_tag: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        let application_key = current.application_key.as_str();
        let version = current.version.as_str();

        if current.tag == new_tag {
            steps.push(Step::BackupSkipped {
                version: version.to_string(),
                key,
            });
            return self
                .set_tag_from(application_key, version, &current.tag, new_tag, steps)
                .await;
        }

        self.registry
            .upsert_properties(
                application_key,
                version,
                &Properties::single(key, current.tag.as_str()),
            )
            .await?;
        debug!(application_key, version, property = %key, value = %current.tag, "backup written");
        steps.push(Step::PropertyWritten {
            version: version.to_string(),
            key,
            value: current.tag.clone(),
        });

        self.set_tag_from(application_key, version, &current.tag, new_tag, steps)
            .await
    }

    /// Promote `new_version` in production.
    ///
    /// If it is the highest production release it takes `latest` and every
    /// other holder gets its pre-`latest` tag back; otherwise it just carries
    /// its own version string.
    pub async fn promote_to_prod(
        &self,
        application_key: &str,
        new_version: &str,
    ) -> Result<TransitionReport, TransitionFailure> {
        let mut report =
            TransitionReport::new(Transition::Promote, application_key, Some(new_version));
        if let Err(e) = validate_application_key(application_key)
            .and_then(|_| validate_version(new_version).map(|_| ()))
        {
            return Err(report.fail(e));
        }

        let _guard = self.locks.acquire(application_key).await;
        match self
            .promote_steps(application_key, new_version, &mut report.steps)
            .await
        {
            Ok(()) => {
                info!(
                    application_key,
                    version = new_version,
                    transition = %Transition::Promote,
                    writes = report.write_count(),
                    "transition completed"
                );
                Ok(report)
            }
            Err(e) => Err(report.fail(e)),
        }
    }

    async fn promote_steps(
        &self,
        application_key: &str,
        new_version: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        let candidates = self.selector.prod_candidates(application_key).await?;
        let Some(target) = candidates.iter().find(|v| v.version == new_version) else {
            return Err(EngineError::Validation(format!(
                "{new_version} is not a production release of {application_key}"
            )));
        };

        let is_top = pick_top(&candidates)
            .is_some_and(|top| SemVer::parse(&top.version) == SemVer::parse(&target.version));

        if !is_top {
            debug!(application_key, version = new_version, "not the top release, keeping own tag");
            return self
                .set_tag_from(application_key, new_version, &target.tag, new_version, steps)
                .await;
        }

        self.backup_then_set_tag_from(target, PropertyKey::OriginalTagBeforeLatest, LATEST_TAG, steps)
            .await?;

        for previous in candidates
            .iter()
            .filter(|v| v.version != new_version && v.is_latest())
        {
            self.restore_tag_from_property(
                application_key,
                &previous.version,
                PropertyKey::OriginalTagBeforeLatest,
                self.fallback_tag(&previous.version),
                steps,
            )
            .await?;
        }

        Ok(())
    }

    /// Roll `target_version` back: it is quarantined, and if it held `latest`
    /// the best remaining release takes over.
    pub async fn rollback_in_prod(
        &self,
        application_key: &str,
        target_version: &str,
    ) -> Result<TransitionReport, TransitionFailure> {
        let mut report =
            TransitionReport::new(Transition::Rollback, application_key, Some(target_version));
        if let Err(e) = validate_application_key(application_key)
            .and_then(|_| validate_version(target_version).map(|_| ()))
        {
            return Err(report.fail(e));
        }

        let _guard = self.locks.acquire(application_key).await;
        match self
            .rollback_steps(application_key, target_version, &mut report.steps)
            .await
        {
            Ok(()) => {
                info!(
                    application_key,
                    version = target_version,
                    transition = %Transition::Rollback,
                    writes = report.write_count(),
                    "transition completed"
                );
                Ok(report)
            }
            Err(e) => Err(report.fail(e)),
        }
    }

    async fn rollback_steps(
        &self,
        application_key: &str,
        target_version: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        let current = self
            .registry
            .get_version_detail(application_key, target_version)
            .await?;
        if !current.release_status.is_production() {
            return Err(EngineError::Validation(format!(
                "{target_version} of {application_key} is {}, not a production release",
                current.release_status
            )));
        }

        self.backup_then_set_tag_from(
            &current,
            PropertyKey::OriginalTagBeforeQuarantine,
            QUARANTINE_TAG,
            steps,
        )
        .await?;

        let candidates = self.selector.prod_candidates(application_key).await?;
        let other_holds_latest = candidates
            .iter()
            .any(|v| v.version != target_version && v.is_latest());

        // A re-run finds the target already quarantined; its backup tells
        // whether the successor promotion is still outstanding.
        let held_latest = current.is_latest()
            || (current.is_quarantined()
                && current
                    .properties
                    .get(PropertyKey::OriginalTagBeforeQuarantine)
                    == Some(LATEST_TAG)
                && !other_holds_latest);

        if !held_latest {
            debug!(application_key, version = target_version, "rolled back version did not hold latest");
            return Ok(());
        }

        // On a re-run only releases below the target can be the successor the
        // first run was about to promote.
        let eligible = if current.is_latest() {
            &candidates[..]
        } else {
            let target = validate_version(target_version)?;
            let start = candidates
                .iter()
                .position(|v| SemVer::parse(&v.version).is_some_and(|s| s < target))
                .unwrap_or(candidates.len());
            &candidates[start..]
        };

        match self
            .selector
            .pick_next_latest(eligible, Some(target_version))
        {
            Some(next) => {
                info!(
                    application_key,
                    from = target_version,
                    to = %next.version,
                    "reassigning latest"
                );
                self.set_tag_from(application_key, &next.version, &next.tag, LATEST_TAG, steps)
                    .await
            }
            None => {
                info!(
                    application_key,
                    version = target_version,
                    "no successor for latest; none until the next promote"
                );
                steps.push(Step::LatestVacated {
                    version: target_version.to_string(),
                });
                Ok(())
            }
        }
    }
}
