//! Promote/rollback scenarios against the in-memory registry

mod helper;

use apptag_reconciler::config::{PolicyConfig, TieBreakPolicy};
use apptag_reconciler::tags::{InvariantViolation, Step, TagStateManager};
use apptag_reconciler::version::error::EngineError;
use apptag_reconciler::version::registries::InMemoryRegistry;
use apptag_reconciler::version::types::{LATEST_TAG, PropertyKey, QUARANTINE_TAG, ReleaseStatus};
use std::sync::Arc;

use helper::{
    APP, assert_at_most_one_latest, latest_with_backup, manager, reconciler, released_registry,
    tag,
};

fn scenario_a_registry() -> Arc<InMemoryRegistry> {
    released_registry(&[("1.3.2", "1.3.2"), ("1.4.0", LATEST_TAG), ("1.5.0", "1.5.0")])
}

#[tokio::test]
async fn promote_new_top_moves_latest_and_restores_previous_holder() {
    let registry = scenario_a_registry();

    manager(&registry).promote_to_prod(APP, "1.5.0").await.unwrap();

    assert_eq!(tag(&registry, "1.5.0"), LATEST_TAG);
    assert_eq!(tag(&registry, "1.4.0"), "1.4.0");
    assert_eq!(tag(&registry, "1.3.2"), "1.3.2");
    assert_eq!(
        registry
            .properties_of(APP, "1.5.0")
            .unwrap()
            .get(PropertyKey::OriginalTagBeforeLatest),
        Some("1.5.0")
    );
}

#[tokio::test]
async fn rollback_of_latest_hands_it_to_previous_release() {
    let registry = scenario_a_registry();
    let manager = manager(&registry);
    manager.promote_to_prod(APP, "1.5.0").await.unwrap();

    let report = manager.rollback_in_prod(APP, "1.5.0").await.unwrap();

    assert_eq!(tag(&registry, "1.5.0"), QUARANTINE_TAG);
    assert_eq!(tag(&registry, "1.4.0"), LATEST_TAG);
    assert_eq!(
        registry
            .properties_of(APP, "1.5.0")
            .unwrap()
            .get(PropertyKey::OriginalTagBeforeQuarantine),
        Some(LATEST_TAG)
    );
    assert_eq!(report.write_count(), 3);
}

#[tokio::test]
async fn rollback_of_only_version_leaves_no_latest() {
    let registry = released_registry(&[("2.0.0", "2.0.0")]);

    let report = manager(&registry).rollback_in_prod(APP, "2.0.0").await.unwrap();

    assert_eq!(tag(&registry, "2.0.0"), QUARANTINE_TAG);
    assert!(registry.latest_holders(APP).is_empty());
    assert!(report.steps.iter().all(|s| !matches!(s, Step::LatestVacated { .. })));
}

#[tokio::test]
async fn rollback_of_only_latest_holder_records_vacancy() {
    let registry = released_registry(&[("2.0.0", LATEST_TAG)]);

    let report = manager(&registry).rollback_in_prod(APP, "2.0.0").await.unwrap();

    assert!(registry.latest_holders(APP).is_empty());
    assert_eq!(
        report.steps.last(),
        Some(&Step::LatestVacated {
            version: "2.0.0".to_string()
        })
    );
}

#[tokio::test]
async fn promote_of_lower_version_keeps_latest_holder() {
    let registry = released_registry(&[("1.2.0", "1.2.0"), ("1.5.0", LATEST_TAG)]);

    let report = manager(&registry).promote_to_prod(APP, "1.2.0").await.unwrap();

    assert_eq!(tag(&registry, "1.2.0"), "1.2.0");
    assert_eq!(tag(&registry, "1.5.0"), LATEST_TAG);
    assert_eq!(report.write_count(), 0);
}

#[tokio::test]
async fn promote_of_lower_version_drops_stray_tag() {
    let registry = released_registry(&[("1.2.0", "candidate"), ("1.5.0", LATEST_TAG)]);

    manager(&registry).promote_to_prod(APP, "1.2.0").await.unwrap();

    assert_eq!(tag(&registry, "1.2.0"), "1.2.0");
}

#[tokio::test]
async fn operation_sequences_never_leave_two_latest_holders() {
    let registry = released_registry(&[
        ("1.0.0", "1.0.0"),
        ("1.1.0", "1.1.0"),
        ("1.2.0", "1.2.0"),
        ("2.0.0", "2.0.0"),
    ]);
    let manager = manager(&registry);
    let operations = [
        ("promote", "1.0.0"),
        ("promote", "1.1.0"),
        ("promote", "2.0.0"),
        ("rollback", "2.0.0"),
        ("promote", "1.0.0"),
        ("rollback", "1.1.0"),
        ("promote", "1.2.0"),
        ("rollback", "1.0.0"),
        ("promote", "2.0.0"),
        ("rollback", "1.2.0"),
        ("promote", "1.1.0"),
    ];

    for (operation, version) in operations {
        let result = match operation {
            "promote" => manager.promote_to_prod(APP, version).await,
            _ => manager.rollback_in_prod(APP, version).await,
        };
        result.unwrap();
        assert_at_most_one_latest(&registry);
    }
}

#[tokio::test]
async fn repeated_promote_makes_no_further_writes() {
    let registry = scenario_a_registry();
    let manager = manager(&registry);

    manager.promote_to_prod(APP, "1.5.0").await.unwrap();
    let after_first = registry.snapshot(APP);
    let writes = registry.write_counts();

    let second = manager.promote_to_prod(APP, "1.5.0").await.unwrap();

    assert_eq!(registry.snapshot(APP), after_first);
    assert_eq!(registry.write_counts(), writes);
    assert_eq!(second.write_count(), 0);
}

#[tokio::test]
async fn promote_of_higher_version_restores_pre_latest_tag() {
    let registry = InMemoryRegistry::new().with_version(APP, "3.0.0", ReleaseStatus::Released);
    registry.insert(latest_with_backup("2.0.0", "v2-stable"));
    let registry = Arc::new(registry);

    manager(&registry).promote_to_prod(APP, "3.0.0").await.unwrap();

    assert_eq!(tag(&registry, "2.0.0"), "v2-stable");
    assert_eq!(tag(&registry, "3.0.0"), LATEST_TAG);
}

#[tokio::test]
async fn quarantined_versions_never_regain_latest_through_rollback() {
    let registry = released_registry(&[
        ("1.0.0", "1.0.0"),
        ("1.1.0", QUARANTINE_TAG),
        ("1.2.0", LATEST_TAG),
    ]);

    manager(&registry).rollback_in_prod(APP, "1.2.0").await.unwrap();

    assert_eq!(tag(&registry, "1.1.0"), QUARANTINE_TAG);
    assert_eq!(registry.latest_holders(APP), vec!["1.0.0"]);
}

#[tokio::test]
async fn failed_restore_is_completed_by_rerunning_promote() {
    let registry = scenario_a_registry();
    let manager = manager(&registry);
    registry.fail_tag_writes_for(APP, "1.4.0");

    let failure = manager.promote_to_prod(APP, "1.5.0").await.unwrap_err();

    assert!(!failure.error.is_validation());
    assert_eq!(failure.report.write_count(), 2);
    assert_eq!(registry.latest_holders(APP).len(), 2);

    registry.clear_failures();
    manager.promote_to_prod(APP, "1.5.0").await.unwrap();

    assert_eq!(registry.latest_holders(APP), vec!["1.5.0"]);
    assert_eq!(tag(&registry, "1.4.0"), "1.4.0");
    assert_eq!(
        registry
            .properties_of(APP, "1.5.0")
            .unwrap()
            .get(PropertyKey::OriginalTagBeforeLatest),
        Some("1.5.0")
    );
}

#[tokio::test]
async fn failed_restore_is_repaired_by_reconciliation() {
    let registry = scenario_a_registry();
    registry.fail_tag_writes_for(APP, "1.4.0");
    manager(&registry)
        .promote_to_prod(APP, "1.5.0")
        .await
        .unwrap_err();
    registry.clear_failures();

    let report = reconciler(&registry).reconcile(APP).await.unwrap();

    assert_eq!(registry.latest_holders(APP), vec!["1.5.0"]);
    assert_eq!(tag(&registry, "1.4.0"), "1.4.0");
    assert!(matches!(
        report.violations.as_slice(),
        [InvariantViolation::MultipleLatest { kept, .. }] if kept == "1.5.0"
    ));
}

#[tokio::test]
async fn interrupted_rollback_resumes_successor_promotion() {
    let registry = released_registry(&[("1.4.0", "1.4.0"), ("1.5.0", LATEST_TAG)]);
    let manager = manager(&registry);
    registry.fail_tag_writes_for(APP, "1.4.0");

    manager.rollback_in_prod(APP, "1.5.0").await.unwrap_err();
    assert_eq!(tag(&registry, "1.5.0"), QUARANTINE_TAG);
    assert!(registry.latest_holders(APP).is_empty());

    registry.clear_failures();
    manager.rollback_in_prod(APP, "1.5.0").await.unwrap();

    assert_eq!(registry.latest_holders(APP), vec!["1.4.0"]);
    assert_eq!(
        registry
            .properties_of(APP, "1.5.0")
            .unwrap()
            .get(PropertyKey::OriginalTagBeforeQuarantine),
        Some(LATEST_TAG)
    );
}

#[tokio::test]
async fn rollback_successor_prefers_trusted_release_among_equal_versions() {
    let registry = InMemoryRegistry::new()
        .with_version(APP, "1.0.0+build.1", ReleaseStatus::Released)
        .with_version(APP, "1.0.0+build.2", ReleaseStatus::TrustedRelease)
        .with_tagged_version(APP, "2.0.0", ReleaseStatus::Released, LATEST_TAG);
    let registry = Arc::new(registry);
    let manager = TagStateManager::new(
        registry.clone(),
        PolicyConfig {
            tie_break: TieBreakPolicy::PreferTrustedRelease,
            ..PolicyConfig::default()
        },
    );

    manager.rollback_in_prod(APP, "2.0.0").await.unwrap();

    assert_eq!(registry.latest_holders(APP), vec!["1.0.0+build.2"]);
}

#[tokio::test]
async fn unknown_application_surfaces_registry_error() {
    let registry = Arc::new(InMemoryRegistry::new());

    let failure = manager(&registry)
        .promote_to_prod("ghost", "1.0.0")
        .await
        .unwrap_err();

    assert!(matches!(failure.error, EngineError::Registry(_)));
    assert!(failure.report.steps.is_empty());
}
