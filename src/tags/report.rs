//! Structured record of what a transition did
//!
//! The engine keeps no state between runs, so the report is the only account
//! of which writes landed before a failure. Callers (or the next
//! reconciliation) use it to see what remains to be corrected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::version::error::EngineError;
use crate::version::types::PropertyKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Promote,
    Rollback,
    Reconcile,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Promote => "promote",
            Transition::Rollback => "rollback",
            Transition::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed sub-step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// The tag was replaced
    TagReplaced {
        version: String,
        from: String,
        to: String,
    },
    /// The tag already had the desired value; nothing was written
    TagUnchanged { version: String, tag: String },
    /// A backup property was written
    PropertyWritten {
        version: String,
        key: PropertyKey,
        value: String,
    },
    /// The backup was skipped because the tag already had its target value
    BackupSkipped { version: String, key: PropertyKey },
    /// `latest` was released and no successor was eligible
    LatestVacated { version: String },
}

impl Step {
    /// Whether the step wrote to the registry.
    pub fn is_write(&self) -> bool {
        matches!(self, Step::TagReplaced { .. } | Step::PropertyWritten { .. })
    }
}

/// Invariant breach found by reconciliation; corrected, never fatal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// More than one production version carried `latest`
    MultipleLatest { holders: Vec<String>, kept: String },
    /// The same version was listed both as `quarantine` and as `latest`
    QuarantinedLatest { version: String },
    /// `latest` was carried by a version outside the production candidates
    LatestOutsideCandidates { version: String },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::MultipleLatest { holders, kept } => write!(
                f,
                "{} versions tagged latest ({}), keeping {}",
                holders.len(),
                holders.join(", "),
                kept
            ),
            InvariantViolation::QuarantinedLatest { version } => {
                write!(f, "{version} is tagged both quarantine and latest")
            }
            InvariantViolation::LatestOutsideCandidates { version } => {
                write!(f, "{version} is tagged latest but is not a production release")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionReport {
    pub application_key: String,
    /// Version the transition targets; `None` for reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub transition: Transition,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<InvariantViolation>,
}

impl TransitionReport {
    pub fn new(transition: Transition, application_key: &str, version: Option<&str>) -> Self {
        Self {
            application_key: application_key.to_string(),
            version: version.map(str::to_string),
            transition,
            started_at: Utc::now(),
            steps: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Number of registry writes performed.
    pub fn write_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_write()).count()
    }

    pub fn fail(self, error: EngineError) -> TransitionFailure {
        TransitionFailure {
            report: self,
            error,
        }
    }
}

/// A transition that stopped part-way; `report` lists the steps that landed.
#[derive(Debug, Error)]
pub struct TransitionFailure {
    pub report: TransitionReport,
    #[source]
    pub error: EngineError,
}

impl fmt::Display for TransitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.report.transition, self.report.application_key)?;
        if let Some(version) = &self.report.version {
            write!(f, "@{version}")?;
        }
        write!(
            f,
            " failed after {} completed steps: {}",
            self.report.steps.len(),
            self.error
        )
    }
}
