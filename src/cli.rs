//! Command-line surface
//!
//! Builds the registry chain from configuration, runs one command and maps
//! the outcome to a process exit code. Reports go to stdout as JSON, logs to
//! stderr.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::tags::{
    Cancellation, ReconcileOutcome, Reconciler, TagStateManager, TransitionFailure,
    TransitionReport,
};
use crate::version::error::EngineError;
use crate::version::registries::{AppTrustRegistry, DryRunRegistry, RetryingRegistry};
use crate::version::registry::Registry;

pub const EXIT_SUCCESS: u8 = 0;
/// Registry rejection, transport error or cancellation
pub const EXIT_FAILURE: u8 = 1;
/// Invalid input
pub const EXIT_VALIDATION: u8 = 2;
/// Registry unreachable after all retries
pub const EXIT_UNREACHABLE: u8 = 3;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Promote a production release; it takes `latest` if it is the highest
    Promote {
        application_key: String,
        version: String,
    },
    /// Quarantine a release and hand `latest` to its successor
    Rollback {
        application_key: String,
        version: String,
    },
    /// Detect and repair inconsistent tags
    Reconcile {
        #[arg(required_unless_present = "all")]
        application_key: Option<String>,
        /// Reconcile every application listed in the configuration
        #[arg(long, conflicts_with = "application_key")]
        all: bool,
    },
    /// Print the next patch version of an application
    NextVersion {
        application_key: String,
        /// Version to bump when the application has no release yet
        #[arg(long)]
        seed: Option<String>,
    },
}

/// Registry stack a command runs against
pub struct RegistryChain {
    pub registry: Arc<dyn Registry>,
    /// Set in dry-run mode to inspect the suppressed writes afterwards
    pub dry_run: Option<Arc<DryRunRegistry>>,
}

impl RegistryChain {
    /// Wrap `base` with retries, and with write suppression if `dry_run`.
    pub fn new(base: Arc<dyn Registry>, config: &Config, dry_run: bool) -> Self {
        let retrying: Arc<dyn Registry> = Arc::new(RetryingRegistry::new(base, config.retry));
        if dry_run {
            let dry_run = Arc::new(DryRunRegistry::new(retrying));
            Self {
                registry: dry_run.clone(),
                dry_run: Some(dry_run),
            }
        } else {
            Self {
                registry: retrying,
                dry_run: None,
            }
        }
    }

    pub fn from_config(config: &Config, dry_run: bool) -> anyhow::Result<Self> {
        if config.registry.access_token.is_none() {
            warn!("no access token configured, requests will be anonymous");
        }
        let base = AppTrustRegistry::new(&config.registry)
            .context("failed to create registry client")?;
        Ok(Self::new(Arc::new(base), config, dry_run))
    }
}

pub fn exit_code(error: &EngineError) -> u8 {
    if error.is_validation() {
        EXIT_VALIDATION
    } else if error.is_unreachable() {
        EXIT_UNREACHABLE
    } else {
        EXIT_FAILURE
    }
}

/// Run `command` against the configured registry.
pub async fn run<W: Write>(
    command: Command,
    config: &Config,
    dry_run: bool,
    cancellation: &Cancellation,
    out: &mut W,
) -> anyhow::Result<u8> {
    let chain = RegistryChain::from_config(config, dry_run)?;
    execute(command, &chain, config, cancellation, out).await
}

/// Run `command` against an already built registry chain.
pub async fn execute<W: Write>(
    command: Command,
    chain: &RegistryChain,
    config: &Config,
    cancellation: &Cancellation,
    out: &mut W,
) -> anyhow::Result<u8> {
    let manager = Arc::new(TagStateManager::new(chain.registry.clone(), config.policy));

    let code = match command {
        Command::Promote {
            application_key,
            version,
        } => {
            let result = manager.promote_to_prod(&application_key, &version).await;
            emit_transition(result, out)?
        }
        Command::Rollback {
            application_key,
            version,
        } => {
            let result = manager.rollback_in_prod(&application_key, &version).await;
            emit_transition(result, out)?
        }
        Command::Reconcile {
            application_key: Some(application_key),
            ..
        } => {
            let result = Reconciler::new(manager)
                .reconcile(&application_key)
                .await;
            emit_transition(result, out)?
        }
        Command::Reconcile {
            application_key: None,
            ..
        } => {
            let keys: Vec<String> = config.applications.iter().map(|a| a.key.clone()).collect();
            anyhow::ensure!(!keys.is_empty(), "no applications configured for --all");
            let outcomes = Reconciler::new(manager)
                .reconcile_all(&keys, cancellation)
                .await;
            emit_sweep(outcomes, out)?
        }
        Command::NextVersion {
            application_key,
            seed,
        } => {
            let seed = seed.or_else(|| {
                config
                    .application(&application_key)
                    .and_then(|app| app.seed.clone())
            });
            match manager
                .selector()
                .next_version(&application_key, seed.as_deref())
                .await
            {
                Ok(next) => {
                    writeln!(out, "{next}")?;
                    EXIT_SUCCESS
                }
                Err(e) => {
                    error!(
                        application_key = %application_key,
                        error = %e,
                        "next version lookup failed"
                    );
                    exit_code(&e)
                }
            }
        }
    };

    if let Some(dry_run) = &chain.dry_run {
        info!(
            planned_writes = dry_run.planned_writes().len(),
            "dry run finished, no writes were sent"
        );
    }

    Ok(code)
}

fn log_failure(failure: &TransitionFailure) {
    error!(
        application_key = %failure.report.application_key,
        version = failure.report.version.as_deref().unwrap_or("-"),
        transition = %failure.report.transition,
        completed_steps = failure.report.steps.len(),
        error = %failure.error,
        "transition failed"
    );
}

fn emit_transition<W: Write>(
    result: Result<TransitionReport, TransitionFailure>,
    out: &mut W,
) -> anyhow::Result<u8> {
    let (report, code) = match result {
        Ok(report) => (report, EXIT_SUCCESS),
        Err(failure) => {
            log_failure(&failure);
            let code = exit_code(&failure.error);
            (failure.report, code)
        }
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(code)
}

#[derive(Serialize)]
struct SweepEntry<'a> {
    application_key: &'a str,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a TransitionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn emit_sweep<W: Write>(
    outcomes: Vec<(String, ReconcileOutcome)>,
    out: &mut W,
) -> anyhow::Result<u8> {
    let mut code = EXIT_SUCCESS;
    let mut entries = Vec::with_capacity(outcomes.len());

    for (application_key, outcome) in &outcomes {
        let entry = match outcome {
            ReconcileOutcome::Reconciled(report) => SweepEntry {
                application_key,
                outcome: "reconciled",
                report: Some(report),
                error: None,
            },
            ReconcileOutcome::Failed(failure) => {
                log_failure(failure);
                code = code.max(exit_code(&failure.error));
                SweepEntry {
                    application_key,
                    outcome: "failed",
                    report: Some(&failure.report),
                    error: Some(failure.error.to_string()),
                }
            }
            ReconcileOutcome::Cancelled => {
                code = code.max(EXIT_FAILURE);
                SweepEntry {
                    application_key,
                    outcome: "cancelled",
                    report: None,
                    error: None,
                }
            }
        };
        entries.push(entry);
    }

    serde_json::to_writer_pretty(&mut *out, &entries)?;
    writeln!(out)?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplicationConfig;
    use crate::version::error::RegistryError;
    use crate::version::registries::InMemoryRegistry;
    use crate::version::types::{LATEST_TAG, ReleaseStatus};
    use rstest::rstest;

    fn chain(registry: &Arc<InMemoryRegistry>, dry_run: bool) -> RegistryChain {
        RegistryChain::new(registry.clone(), &Config::default(), dry_run)
    }

    async fn execute_to_string(
        command: Command,
        chain: &RegistryChain,
        config: &Config,
    ) -> (u8, String) {
        let mut out = Vec::new();
        let code = execute(command, chain, config, &Cancellation::new(), &mut out)
            .await
            .unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    #[rstest]
    #[case(EngineError::Validation("bad".to_string()), EXIT_VALIDATION)]
    #[case(
        EngineError::Registry(RegistryError::RetriesExhausted {
            attempts: 5,
            last: Box::new(RegistryError::Timeout { timeout_ms: 10 }),
        }),
        EXIT_UNREACHABLE
    )]
    #[case(
        EngineError::Registry(RegistryError::Forbidden { status: 403, body: String::new() }),
        EXIT_FAILURE
    )]
    fn exit_code_classifies_errors(#[case] error: EngineError, #[case] expected: u8) {
        assert_eq!(exit_code(&error), expected);
    }

    #[tokio::test]
    async fn promote_prints_report_and_succeeds() {
        let registry = Arc::new(
            InMemoryRegistry::new().with_version("inventory", "1.0.0", ReleaseStatus::Released),
        );

        let (code, output) = execute_to_string(
            Command::Promote {
                application_key: "inventory".to_string(),
                version: "1.0.0".to_string(),
            },
            &chain(&registry, false),
            &Config::default(),
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        let report: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["transition"], "promote");
        assert_eq!(registry.latest_holders("inventory"), vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn invalid_version_exits_with_validation_code() {
        let registry = Arc::new(InMemoryRegistry::new());

        let (code, _) = execute_to_string(
            Command::Rollback {
                application_key: "inventory".to_string(),
                version: "latest".to_string(),
            },
            &chain(&registry, false),
            &Config::default(),
        )
        .await;

        assert_eq!(code, EXIT_VALIDATION);
    }

    #[tokio::test]
    async fn dry_run_leaves_registry_untouched() {
        let registry = Arc::new(
            InMemoryRegistry::new()
                .with_tagged_version("inventory", "1.0.0", ReleaseStatus::Released, LATEST_TAG)
                .with_version("inventory", "1.1.0", ReleaseStatus::Released),
        );
        let chain = chain(&registry, true);

        let (code, _) = execute_to_string(
            Command::Promote {
                application_key: "inventory".to_string(),
                version: "1.1.0".to_string(),
            },
            &chain,
            &Config::default(),
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(registry.write_counts(), (0, 0));
        assert_eq!(registry.latest_holders("inventory"), vec!["1.0.0"]);
        assert_eq!(chain.dry_run.unwrap().planned_writes().len(), 3);
    }

    #[tokio::test]
    async fn next_version_uses_configured_seed() {
        let registry = Arc::new(InMemoryRegistry::new());
        let config = Config {
            applications: vec![ApplicationConfig {
                key: "inventory".to_string(),
                seed: Some("2.0.0".to_string()),
            }],
            ..Config::default()
        };

        let (code, output) = execute_to_string(
            Command::NextVersion {
                application_key: "inventory".to_string(),
                seed: None,
            },
            &chain(&registry, false),
            &config,
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(output.trim(), "2.0.1");
    }

    #[tokio::test]
    async fn reconcile_all_requires_configured_applications() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut out = Vec::new();

        let result = execute(
            Command::Reconcile {
                application_key: None,
                all: true,
            },
            &chain(&registry, false),
            &Config::default(),
            &Cancellation::new(),
            &mut out,
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reconcile_all_reports_every_application() {
        let registry = Arc::new(
            InMemoryRegistry::new()
                .with_tagged_version("a", "1.0.0", ReleaseStatus::Released, LATEST_TAG)
                .with_tagged_version("a", "1.1.0", ReleaseStatus::Released, LATEST_TAG)
                .with_version("b", "1.0.0", ReleaseStatus::Released),
        );
        let config = Config {
            applications: ["a", "b"]
                .into_iter()
                .map(|key| ApplicationConfig {
                    key: key.to_string(),
                    seed: None,
                })
                .collect(),
            ..Config::default()
        };

        let (code, output) = execute_to_string(
            Command::Reconcile {
                application_key: None,
                all: true,
            },
            &chain(&registry, false),
            &config,
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        let entries: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(entries.as_array().unwrap().len(), 2);
        assert_eq!(entries[0]["outcome"], "reconciled");
        assert_eq!(registry.latest_holders("a"), vec!["1.1.0"]);
    }
}
