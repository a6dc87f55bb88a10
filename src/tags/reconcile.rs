//! Detection and repair of tag invariant breaches
//!
//! A reconciliation pass reads the full version set of an application and
//! corrects what concurrent runs, manual edits or half-finished transitions
//! left behind. Every breach is logged and reported, never treated as fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::tags::lock::Cancellation;
use crate::tags::report::{InvariantViolation, Step, Transition, TransitionFailure, TransitionReport};
use crate::tags::state::{TagStateManager, validate_application_key};
use crate::version::error::EngineError;
use crate::version::selector::{pick_preferred, prod_candidates_from};
use crate::version::types::{ApplicationVersion, LATEST_TAG, PropertyKey, QUARANTINE_TAG};

/// Delay between starting reconciliation of consecutive applications
const RECONCILE_STAGGER_DELAY_MS: u64 = 50;

/// Result of reconciling one application in a sweep
#[derive(Debug)]
pub enum ReconcileOutcome {
    Reconciled(TransitionReport),
    Failed(TransitionFailure),
    /// Cancellation was requested before the application was started
    Cancelled,
}

pub struct Reconciler {
    manager: Arc<TagStateManager>,
}

impl Reconciler {
    pub fn new(manager: Arc<TagStateManager>) -> Self {
        Self { manager }
    }

    /// Detect and correct tag breaches of one application.
    pub async fn reconcile(
        &self,
        application_key: &str,
    ) -> Result<TransitionReport, TransitionFailure> {
        let mut report = TransitionReport::new(Transition::Reconcile, application_key, None);
        if let Err(e) = validate_application_key(application_key) {
            return Err(report.fail(e));
        }

        let _guard = self.manager.locks().acquire(application_key).await;
        match self.reconcile_steps(application_key, &mut report).await {
            Ok(()) => {
                info!(
                    application_key,
                    transition = %Transition::Reconcile,
                    violations = report.violations.len(),
                    writes = report.write_count(),
                    "reconciliation completed"
                );
                Ok(report)
            }
            Err(e) => Err(report.fail(e)),
        }
    }

    /// Reconcile several applications concurrently.
    ///
    /// Starts are staggered, and cancellation is checked before each
    /// application starts; an application already in progress runs to the
    /// end of its current pass.
    pub async fn reconcile_all(
        &self,
        application_keys: &[String],
        cancellation: &Cancellation,
    ) -> Vec<(String, ReconcileOutcome)> {
        let futures = application_keys.iter().enumerate().map(|(i, key)| {
            let delay = Duration::from_millis(RECONCILE_STAGGER_DELAY_MS * i as u64);
            async move {
                sleep(delay).await;
                if cancellation.is_cancelled() {
                    info!(application_key = %key, "cancelled before start");
                    return (key.clone(), ReconcileOutcome::Cancelled);
                }
                let outcome = match self.reconcile(key).await {
                    Ok(report) => ReconcileOutcome::Reconciled(report),
                    Err(failure) => ReconcileOutcome::Failed(failure),
                };
                (key.clone(), outcome)
            }
        });

        join_all(futures).await
    }

    async fn reconcile_steps(
        &self,
        application_key: &str,
        report: &mut TransitionReport,
    ) -> Result<(), EngineError> {
        let selector = self.manager.selector();
        let versions = selector.all_versions(application_key).await?;
        let candidates = prod_candidates_from(versions.clone());
        let candidate_versions: HashSet<&str> =
            candidates.iter().map(|v| v.version.as_str()).collect();
        let mut vacated = false;

        // latest on an unreleased or unparsable version
        let mut outside: Vec<&ApplicationVersion> = Vec::new();
        for version in versions
            .iter()
            .filter(|v| v.is_latest() && !candidate_versions.contains(v.version.as_str()))
        {
            if !outside.iter().any(|o| o.version == version.version) {
                outside.push(version);
            }
        }
        for version in outside {
            self.record(
                report,
                application_key,
                InvariantViolation::LatestOutsideCandidates {
                    version: version.version.clone(),
                },
            );
            self.manager
                .restore_tag_from_property(
                    application_key,
                    &version.version,
                    PropertyKey::OriginalTagBeforeLatest,
                    self.manager.fallback_tag(&version.version),
                    &mut report.steps,
                )
                .await?;
            vacated = true;
        }

        // the same version listed both as quarantine and as latest
        let quarantined: HashSet<&str> = candidates
            .iter()
            .filter(|v| v.is_quarantined())
            .map(|v| v.version.as_str())
            .collect();
        let mut contradictory: Vec<&str> = Vec::new();
        for version in candidates
            .iter()
            .filter(|v| v.is_latest() && quarantined.contains(v.version.as_str()))
        {
            if !contradictory.contains(&version.version.as_str()) {
                contradictory.push(&version.version);
            }
        }
        for version in &contradictory {
            self.record(
                report,
                application_key,
                InvariantViolation::QuarantinedLatest {
                    version: version.to_string(),
                },
            );
            // The detail read may return the quarantined record, so write
            // unconditionally from the latest side.
            self.manager
                .set_tag_from(
                    application_key,
                    version,
                    LATEST_TAG,
                    QUARANTINE_TAG,
                    &mut report.steps,
                )
                .await?;
            vacated = true;
        }

        // more than one production version holding latest
        let mut holders: Vec<&ApplicationVersion> = Vec::new();
        for version in candidates
            .iter()
            .filter(|v| v.is_latest() && !contradictory.contains(&v.version.as_str()))
        {
            if !holders.iter().any(|h| h.version == version.version) {
                holders.push(version);
            }
        }
        if holders.len() > 1 {
            if let Some(kept) = pick_preferred(holders.iter().copied(), selector.tie_break()) {
                self.record(
                    report,
                    application_key,
                    InvariantViolation::MultipleLatest {
                        holders: holders.iter().map(|h| h.version.clone()).collect(),
                        kept: kept.version.clone(),
                    },
                );
                for demoted in holders.iter().filter(|h| h.version != kept.version) {
                    self.manager
                        .restore_tag_from_property(
                            application_key,
                            &demoted.version,
                            PropertyKey::OriginalTagBeforeLatest,
                            self.manager.fallback_tag(&demoted.version),
                            &mut report.steps,
                        )
                        .await?;
                }
            }
        }

        if vacated {
            self.reassign_latest(application_key, &mut report.steps)
                .await?;
        }

        if report.violations.is_empty() {
            debug!(application_key, "no tag inconsistencies found");
        }
        Ok(())
    }

    /// Give `latest` to the best remaining release if nobody holds it.
    async fn reassign_latest(
        &self,
        application_key: &str,
        steps: &mut Vec<Step>,
    ) -> Result<(), EngineError> {
        let selector = self.manager.selector();
        let candidates = selector.prod_candidates(application_key).await?;
        if candidates.iter().any(|v| v.is_latest()) {
            return Ok(());
        }

        match selector.pick_next_latest(&candidates, None) {
            Some(next) => {
                info!(application_key, to = %next.version, "reassigning latest");
                self.manager
                    .set_tag_from(application_key, &next.version, &next.tag, LATEST_TAG, steps)
                    .await
            }
            None => {
                info!(application_key, "no eligible release for latest");
                Ok(())
            }
        }
    }

    fn record(
        &self,
        report: &mut TransitionReport,
        application_key: &str,
        violation: InvariantViolation,
    ) {
        warn!(application_key, %violation, "tag invariant violated, correcting");
        report.violations.push(violation);
    }
}
