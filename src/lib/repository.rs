use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, EventEnvelope, EventSourced, Snapshot, TenantId},
    config::DEFAULT_SNAPSHOT_INTERVAL,
    error::{CoverError, Result},
    store::{EventStore, StoredEnvelope, StoredSnapshot},
};

/// Typed facade over the event store: loads aggregates by replaying
/// snapshot-then-events, and persists pending events together with the
/// projected read-model row in one optimistic append.
#[derive(Clone)]
pub struct AggregateRepository {
    store: Arc<EventStore>,
    snapshot_interval: u64,
}

impl AggregateRepository {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self::with_snapshot_interval(store, DEFAULT_SNAPSHOT_INTERVAL)
    }

    pub fn with_snapshot_interval(store: Arc<EventStore>, snapshot_interval: u64) -> Self {
        Self {
            store,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn get<A: Aggregate>(&self, tenant: &TenantId, id: Uuid) -> Result<EventSourced<A>> {
        if let Some(stored) = self.store.latest_snapshot(A::KIND, tenant, id)? {
            let state: A = serde_json::from_value(stored.state.clone())
                .map_err(|err| CoverError::Serialization(err.to_string()))?;
            let snapshot = Snapshot {
                state,
                version: stored.version,
                created_at: stored.aggregate_created_at,
                last_modified_at: stored.last_modified_at,
            };
            let events = self.load_events::<A>(tenant, id, stored.version)?;
            return EventSourced::load_from_snapshot(tenant.clone(), id, snapshot, events);
        }

        let events = self.load_events::<A>(tenant, id, 0)?;
        if events.is_empty() {
            return Err(CoverError::AggregateNotFound);
        }
        EventSourced::load(tenant.clone(), id, events)
    }

    /// Persists pending events and the refreshed read-model row. A stale
    /// loaded version surfaces as [`CoverError::VersionConflict`] and leaves
    /// the pending buffer intact. Cuts a snapshot whenever the stream crosses
    /// the snapshot interval.
    pub fn save<A: Aggregate>(&self, aggregate: &mut EventSourced<A>) -> Result<()> {
        if !aggregate.has_pending() {
            return Ok(());
        }

        let pending = aggregate.pending();
        let expected_version = aggregate.version() - pending.len() as u64;
        let tenant = aggregate.tenant().clone();
        let id = aggregate.id();

        let mut stored = Vec::with_capacity(pending.len());
        for envelope in pending {
            stored.push(StoredEnvelope {
                event_id: Uuid::new_v4(),
                tenant: envelope.tenant.clone(),
                aggregate_id: envelope.aggregate_id,
                sequence: envelope.sequence,
                performing_user_id: envelope.performing_user_id,
                recorded_at: envelope.recorded_at,
                payload: serde_json::to_value(&envelope.event)?,
            });
        }

        let read_model = serde_json::to_value(aggregate.read_model())?;
        self.store
            .append(A::KIND, &tenant, id, expected_version, &stored, read_model)?;
        aggregate.take_pending();

        if expected_version / self.snapshot_interval
            != aggregate.version() / self.snapshot_interval
        {
            self.cut_snapshot(aggregate)?;
        }

        Ok(())
    }

    /// Read-model row for one aggregate, as stored.
    pub fn read_model_row<A: Aggregate>(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<Option<Value>> {
        self.store.read_model(A::KIND, tenant, id)
    }

    pub fn list_read_models<A: Aggregate>(&self, tenant: &TenantId) -> Result<Vec<Value>> {
        self.store.list_read_models(A::KIND, tenant)
    }

    pub fn events<A: Aggregate>(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> Result<Vec<StoredEnvelope>> {
        self.store.events_after(A::KIND, tenant, id, 0)
    }

    fn load_events<A: Aggregate>(
        &self,
        tenant: &TenantId,
        id: Uuid,
        after: u64,
    ) -> Result<Vec<EventEnvelope<A::Event>>> {
        let stored = self.store.events_after(A::KIND, tenant, id, after)?;
        let mut events = Vec::with_capacity(stored.len());
        for envelope in stored {
            let event: A::Event = serde_json::from_value(envelope.payload)
                .map_err(|err| CoverError::Serialization(err.to_string()))?;
            events.push(EventEnvelope {
                tenant: envelope.tenant,
                aggregate_id: envelope.aggregate_id,
                sequence: envelope.sequence,
                performing_user_id: envelope.performing_user_id,
                recorded_at: envelope.recorded_at,
                event,
            });
        }
        Ok(events)
    }

    fn cut_snapshot<A: Aggregate>(&self, aggregate: &EventSourced<A>) -> Result<()> {
        let meta = aggregate.meta();
        let snapshot = StoredSnapshot {
            kind: A::KIND.to_string(),
            tenant: meta.tenant.clone(),
            aggregate_id: meta.aggregate_id,
            version: meta.version,
            state: serde_json::to_value(aggregate.state())?,
            aggregate_created_at: meta.created_at,
            last_modified_at: meta.last_modified_at,
            taken_at: Utc::now(),
        };
        self.store.save_snapshot(&snapshot)
    }
}
