use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    aggregate::TenantId,
    error::{CoverError, Result},
};

const SEP: u8 = 0x1F;
const PREFIX_EVENT: &str = "evt";
const PREFIX_META: &str = "meta";
const PREFIX_STATE: &str = "state";
const PREFIX_SNAPSHOT: &str = "snapshot";

/// Persisted form of a domain event: the envelope with the payload as a
/// serde-tagged JSON value. Append-only; rows are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub event_id: Uuid,
    pub tenant: TenantId,
    pub aggregate_id: Uuid,
    pub sequence: u64,
    pub performing_user_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMeta {
    pub kind: String,
    pub tenant: TenantId,
    pub aggregate_id: Uuid,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub kind: String,
    pub tenant: TenantId,
    pub aggregate_id: Uuid,
    pub version: u64,
    pub state: Value,
    pub aggregate_created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

/// RocksDB-backed event store.
///
/// Events, per-aggregate metadata, the projected read-model row, and the
/// latest snapshot live under distinct key prefixes; every append commits all
/// of them in one write batch. The write lock serializes appends so the
/// expected-version check and the batch write are atomic with respect to each
/// other; racing writers surface as version conflicts, never lost updates.
pub struct EventStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
}

impl EventStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, path)
            .map_err(|err| CoverError::Storage(err.to_string()))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Appends a contiguous run of envelopes and the refreshed read-model row.
    ///
    /// `expected_version` is the version the caller loaded; a mismatch with
    /// the persisted version means another writer won the race and the append
    /// fails with a conflict. Returns the new version.
    pub fn append(
        &self,
        kind: &'static str,
        tenant: &TenantId,
        aggregate_id: Uuid,
        expected_version: u64,
        envelopes: &[StoredEnvelope],
        read_model: Value,
    ) -> Result<u64> {
        if envelopes.is_empty() {
            return Ok(expected_version);
        }
        let _guard = self.write_lock.lock();

        let now = Utc::now();
        let mut meta = match self.load_meta(kind, tenant, aggregate_id)? {
            Some(meta) => meta,
            None => StoredMeta {
                kind: kind.to_string(),
                tenant: tenant.clone(),
                aggregate_id,
                version: 0,
                created_at: envelopes[0].recorded_at,
                last_modified_at: now,
            },
        };

        if meta.version != expected_version {
            return Err(CoverError::VersionConflict {
                kind,
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual: meta.version,
            });
        }

        let mut batch = WriteBatch::default();
        let mut next = meta.version;
        for envelope in envelopes {
            next += 1;
            if envelope.sequence != next {
                return Err(CoverError::ReplayOutOfOrder {
                    kind,
                    aggregate_id: aggregate_id.to_string(),
                    expected: next,
                    found: envelope.sequence,
                });
            }
            batch.put(
                event_key(kind, tenant, aggregate_id, envelope.sequence),
                serde_json::to_vec(envelope)?,
            );
        }

        meta.version = next;
        meta.last_modified_at = envelopes
            .last()
            .map(|e| e.recorded_at)
            .unwrap_or(now);

        batch.put(meta_key(kind, tenant, aggregate_id), serde_json::to_vec(&meta)?);
        batch.put(
            state_key(kind, tenant, aggregate_id),
            serde_json::to_vec(&read_model)?,
        );

        self.db
            .write(batch)
            .map_err(|err| CoverError::Storage(err.to_string()))?;

        metrics::counter!("coverbase_events_appended_total", "kind" => kind)
            .increment(envelopes.len() as u64);

        Ok(next)
    }

    /// Ordered scan of events with sequence strictly greater than `after`.
    pub fn events_after(
        &self,
        kind: &str,
        tenant: &TenantId,
        aggregate_id: Uuid,
        after: u64,
    ) -> Result<Vec<StoredEnvelope>> {
        let prefix = event_prefix(kind, tenant, aggregate_id);
        let start = event_key(kind, tenant, aggregate_id, after + 1);
        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_slice(), Direction::Forward));

        let mut events = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|err| CoverError::Storage(err.to_string()))?;
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            let envelope: StoredEnvelope = serde_json::from_slice(&value)?;
            events.push(envelope);
        }
        Ok(events)
    }

    pub fn meta(
        &self,
        kind: &str,
        tenant: &TenantId,
        aggregate_id: Uuid,
    ) -> Result<Option<StoredMeta>> {
        self.load_meta(kind, tenant, aggregate_id)
    }

    pub fn save_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()> {
        self.db
            .put(
                snapshot_key(&snapshot.kind, &snapshot.tenant, snapshot.aggregate_id),
                serde_json::to_vec(snapshot)?,
            )
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        Ok(())
    }

    /// Latest snapshot for the aggregate, if one has been cut.
    pub fn latest_snapshot(
        &self,
        kind: &str,
        tenant: &TenantId,
        aggregate_id: Uuid,
    ) -> Result<Option<StoredSnapshot>> {
        let value = self
            .db
            .get(snapshot_key(kind, tenant, aggregate_id))
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        match value {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Projected read-model row for one aggregate.
    pub fn read_model(
        &self,
        kind: &str,
        tenant: &TenantId,
        aggregate_id: Uuid,
    ) -> Result<Option<Value>> {
        let value = self
            .db
            .get(state_key(kind, tenant, aggregate_id))
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        match value {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// All projected rows of one kind within a tenancy.
    pub fn list_read_models(&self, kind: &str, tenant: &TenantId) -> Result<Vec<Value>> {
        let prefix = segmented_key(&[PREFIX_STATE, kind, tenant.as_str()]);
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|err| CoverError::Storage(err.to_string()))?;
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            if key.len() > prefix.len() && key[prefix.len()] != SEP {
                break;
            }
            let row: Value = serde_json::from_slice(&value)?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn load_meta(
        &self,
        kind: &str,
        tenant: &TenantId,
        aggregate_id: Uuid,
    ) -> Result<Option<StoredMeta>> {
        let value = self
            .db
            .get(meta_key(kind, tenant, aggregate_id))
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        match value {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }
}

fn segmented_key(segments: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(segment.as_bytes());
    }
    key
}

fn event_prefix(kind: &str, tenant: &TenantId, aggregate_id: Uuid) -> Vec<u8> {
    let id = aggregate_id.to_string();
    let mut key = segmented_key(&[PREFIX_EVENT, kind, tenant.as_str(), &id]);
    key.push(SEP);
    key
}

fn event_key(kind: &str, tenant: &TenantId, aggregate_id: Uuid, sequence: u64) -> Vec<u8> {
    let mut key = event_prefix(kind, tenant, aggregate_id);
    key.extend_from_slice(format!("{sequence:020}").as_bytes());
    key
}

fn meta_key(kind: &str, tenant: &TenantId, aggregate_id: Uuid) -> Vec<u8> {
    let id = aggregate_id.to_string();
    segmented_key(&[PREFIX_META, kind, tenant.as_str(), &id])
}

fn state_key(kind: &str, tenant: &TenantId, aggregate_id: Uuid) -> Vec<u8> {
    let id = aggregate_id.to_string();
    segmented_key(&[PREFIX_STATE, kind, tenant.as_str(), &id])
}

fn snapshot_key(kind: &str, tenant: &TenantId, aggregate_id: Uuid) -> Vec<u8> {
    let id = aggregate_id.to_string();
    segmented_key(&[PREFIX_SNAPSHOT, kind, tenant.as_str(), &id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new("acme").expect("tenant")
    }

    fn envelope(tenant: &TenantId, id: Uuid, sequence: u64) -> StoredEnvelope {
        StoredEnvelope {
            event_id: Uuid::new_v4(),
            tenant: tenant.clone(),
            aggregate_id: id,
            sequence,
            performing_user_id: None,
            recorded_at: Utc::now(),
            payload: json!({ "type": "noted", "sequence": sequence }),
        }
    }

    #[test]
    fn append_then_read_back_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events")).expect("open");
        let tenant = tenant();
        let id = Uuid::new_v4();

        let batch = vec![envelope(&tenant, id, 1), envelope(&tenant, id, 2)];
        let version = store
            .append("widget", &tenant, id, 0, &batch, json!({ "id": id }))
            .expect("append");
        assert_eq!(version, 2);

        let events = store.events_after("widget", &tenant, id, 0).expect("scan");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);

        let tail = store.events_after("widget", &tenant, id, 1).expect("tail");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
    }

    #[test]
    fn stale_expected_version_is_a_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events")).expect("open");
        let tenant = tenant();
        let id = Uuid::new_v4();

        store
            .append("widget", &tenant, id, 0, &[envelope(&tenant, id, 1)], json!({}))
            .expect("first append");

        let err = store
            .append("widget", &tenant, id, 0, &[envelope(&tenant, id, 2)], json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            CoverError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn read_model_row_tracks_latest_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events")).expect("open");
        let tenant = tenant();
        let id = Uuid::new_v4();

        store
            .append(
                "widget",
                &tenant,
                id,
                0,
                &[envelope(&tenant, id, 1)],
                json!({ "name": "first" }),
            )
            .expect("append");
        store
            .append(
                "widget",
                &tenant,
                id,
                1,
                &[envelope(&tenant, id, 2)],
                json!({ "name": "second" }),
            )
            .expect("append");

        let row = store
            .read_model("widget", &tenant, id)
            .expect("read model")
            .expect("row present");
        assert_eq!(row["name"], "second");

        let rows = store.list_read_models("widget", &tenant).expect("list");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn snapshots_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events")).expect("open");
        let tenant = tenant();
        let id = Uuid::new_v4();

        assert!(store
            .latest_snapshot("widget", &tenant, id)
            .expect("none yet")
            .is_none());

        let snapshot = StoredSnapshot {
            kind: "widget".into(),
            tenant: tenant.clone(),
            aggregate_id: id,
            version: 7,
            state: json!({ "count": 7 }),
            aggregate_created_at: Utc::now(),
            last_modified_at: Utc::now(),
            taken_at: Utc::now(),
        };
        store.save_snapshot(&snapshot).expect("save");

        let loaded = store
            .latest_snapshot("widget", &tenant, id)
            .expect("load")
            .expect("snapshot present");
        assert_eq!(loaded.version, 7);
        assert_eq!(loaded.state["count"], 7);
    }

    #[test]
    fn streams_are_isolated_by_tenant_and_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events")).expect("open");
        let first = TenantId::new("first").expect("tenant");
        let second = TenantId::new("second").expect("tenant");
        let id = Uuid::new_v4();

        store
            .append("widget", &first, id, 0, &[envelope(&first, id, 1)], json!({}))
            .expect("append");

        assert!(store
            .events_after("widget", &second, id, 0)
            .expect("scan")
            .is_empty());
        assert!(store
            .events_after("gadget", &first, id, 0)
            .expect("scan")
            .is_empty());
    }
}
