use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use coverbase::{
    aggregate::{EventSourced, TenantId},
    error::CoverError,
    organisation::{Organisation, SignInMethodKind},
    portal::{Portal, PortalKind},
    repository::AggregateRepository,
    store::EventStore,
};

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn open_repository(temp: &TempDir, snapshot_interval: u64) -> TestResult<AggregateRepository> {
    let store = Arc::new(EventStore::open(temp.path().join("events"))?);
    Ok(AggregateRepository::with_snapshot_interval(store, snapshot_interval))
}

fn tenant() -> TenantId {
    TenantId::new("carina-mutual").expect("tenant id")
}

#[test]
fn organisation_round_trips_through_the_store() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let tenant = tenant();

    let id = Uuid::new_v4();
    let mut organisation = EventSourced::<Organisation>::initialize(
        tenant.clone(),
        id,
        "Carina Mutual",
        "carina-mutual",
        None,
        Utc::now(),
    )?;
    let method = Uuid::new_v4();
    organisation.add_sign_in_method(method, SignInMethodKind::Saml, "Corporate SSO", None, Utc::now())?;
    repository.save(&mut organisation)?;
    assert!(!organisation.has_pending());

    let loaded = repository.get::<Organisation>(&tenant, id)?;
    assert_eq!(loaded.version(), 2);
    assert_eq!(loaded.state().name, "Carina Mutual");
    assert_eq!(loaded.state().sign_in_methods.len(), 1);
    assert_eq!(loaded.state(), organisation.state());

    let row = repository
        .read_model_row::<Organisation>(&tenant, id)?
        .expect("read model row");
    assert_eq!(row["alias"], "carina-mutual");
    assert_eq!(row["version"], 2);
    Ok(())
}

#[test]
fn replay_is_deterministic_across_loads() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let tenant = tenant();

    let id = Uuid::new_v4();
    let mut organisation = EventSourced::<Organisation>::initialize(
        tenant.clone(),
        id,
        "Replay Test",
        "replay-test",
        None,
        Utc::now(),
    )?;
    organisation.rename("Replay Test Two", None, Utc::now())?;
    organisation.set_default(None, Utc::now())?;
    repository.save(&mut organisation)?;

    let first = repository.get::<Organisation>(&tenant, id)?;
    let second = repository.get::<Organisation>(&tenant, id)?;
    assert_eq!(first.state(), second.state());
    assert_eq!(first.version(), second.version());
    Ok(())
}

#[test]
fn stale_save_surfaces_a_version_conflict() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let tenant = tenant();

    let id = Uuid::new_v4();
    let mut organisation = EventSourced::<Organisation>::initialize(
        tenant.clone(),
        id,
        "Conflict Test",
        "conflict-test",
        None,
        Utc::now(),
    )?;
    repository.save(&mut organisation)?;

    let mut first = repository.get::<Organisation>(&tenant, id)?;
    let mut second = repository.get::<Organisation>(&tenant, id)?;

    first.rename("First Writer", None, Utc::now())?;
    repository.save(&mut first)?;

    second.rename("Second Writer", None, Utc::now())?;
    let err = repository.save(&mut second).unwrap_err();
    assert!(matches!(err, CoverError::VersionConflict { .. }));

    // The losing copy keeps its pending events; nothing was overwritten.
    assert!(second.has_pending());
    let persisted = repository.get::<Organisation>(&tenant, id)?;
    assert_eq!(persisted.state().name, "First Writer");
    Ok(())
}

#[test]
fn snapshots_resume_replay_with_identical_state() -> TestResult<()> {
    let temp = TempDir::new()?;
    // Small interval so the stream crosses it quickly.
    let repository = open_repository(&temp, 4)?;
    let tenant = tenant();

    let id = Uuid::new_v4();
    let mut organisation = EventSourced::<Organisation>::initialize(
        tenant.clone(),
        id,
        "Snapshot Test",
        "snapshot-test",
        None,
        Utc::now(),
    )?;
    for index in 0..6 {
        organisation.rename(&format!("Snapshot Test {index}"), None, Utc::now())?;
        repository.save(&mut organisation)?;
    }

    let snapshot = repository
        .store()
        .latest_snapshot("organisation", &tenant, id)?
        .expect("snapshot cut after crossing the interval");
    assert!(snapshot.version >= 4);
    assert!(snapshot.version < organisation.version());

    // Loading goes through the snapshot path and must match the full fold.
    let loaded = repository.get::<Organisation>(&tenant, id)?;
    assert_eq!(loaded.version(), organisation.version());
    assert_eq!(loaded.state(), organisation.state());
    assert_eq!(loaded.state().name, "Snapshot Test 5");
    Ok(())
}

#[test]
fn missing_aggregates_are_not_found() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let err = repository
        .get::<Organisation>(&tenant(), Uuid::new_v4())
        .unwrap_err();
    assert!(matches!(err, CoverError::AggregateNotFound));
    Ok(())
}

#[test]
fn portal_read_models_list_per_tenant() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let tenant = tenant();
    let other_tenant = TenantId::new("someone-else").expect("tenant id");
    let organisation_id = Uuid::new_v4();

    for (name, alias) in [("Broker Portal", "broker"), ("Customer Portal", "customer")] {
        let mut portal = EventSourced::<Portal>::initialize(
            tenant.clone(),
            Uuid::new_v4(),
            organisation_id,
            name,
            alias,
            name,
            PortalKind::Agent,
            None,
            Utc::now(),
        )?;
        repository.save(&mut portal)?;
    }

    let rows = repository.list_read_models::<Portal>(&tenant)?;
    assert_eq!(rows.len(), 2);
    assert!(repository.list_read_models::<Portal>(&other_tenant)?.is_empty());
    Ok(())
}

#[test]
fn domain_violations_propagate_from_stored_aggregates() -> TestResult<()> {
    let temp = TempDir::new()?;
    let repository = open_repository(&temp, 100)?;
    let tenant = tenant();

    let id = Uuid::new_v4();
    let mut organisation = EventSourced::<Organisation>::initialize(
        tenant.clone(),
        id,
        "Rules Test",
        "rules-test",
        None,
        Utc::now(),
    )?;
    organisation.set_default(None, Utc::now())?;
    repository.save(&mut organisation)?;

    let mut loaded = repository.get::<Organisation>(&tenant, id)?;
    let err = loaded.set_default(None, Utc::now()).unwrap_err();
    assert_eq!(err.code(), "organisation.default.duplicate");
    Ok(())
}
