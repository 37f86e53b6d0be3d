use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoverError, DomainError, Result};

pub const MAX_TENANT_ID_LENGTH: usize = 64;

/// Normalized tenant identifier: lowercase letters, digits, hyphens and
/// underscores, bounded length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoverError::InvalidTenantId("tenant id is empty".into()));
        }
        if trimmed.len() > MAX_TENANT_ID_LENGTH {
            return Err(CoverError::InvalidTenantId(format!(
                "tenant id exceeds {MAX_TENANT_ID_LENGTH} characters"
            )));
        }
        let normalized = trimmed.to_ascii_lowercase();
        if !normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(CoverError::InvalidTenantId(format!(
                "tenant id '{trimmed}' contains characters outside [a-z0-9-_]"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable domain event record. Once appended to a stream it is never
/// mutated; replaying the stream in sequence order reproduces aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    pub tenant: TenantId,
    pub aggregate_id: Uuid,
    pub sequence: u64,
    pub performing_user_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub event: E,
}

/// An event-sourced domain entity.
///
/// The event type is a closed serde-tagged enum; `apply` matches on it
/// exhaustively, so every event variant is guaranteed a handler at compile
/// time. No state field is written outside `apply`. State is serializable so
/// snapshots can persist it directly.
pub trait Aggregate: Default + Serialize + DeserializeOwned {
    const KIND: &'static str;

    type Event: fmt::Debug + Clone + Serialize + DeserializeOwned;
    type ReadModel: Serialize + DeserializeOwned;

    /// Fold one event into the projected state. Business-rule violations
    /// surface as [`DomainError`] and abort the mutation (and any replay that
    /// encounters them).
    fn apply(&mut self, event: &Self::Event) -> std::result::Result<(), DomainError>;

    /// Denormalized row kept in sync with committed events.
    fn read_model(&self, meta: &AggregateMeta) -> Self::ReadModel;
}

/// Identity and replay bookkeeping shared by every aggregate instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub tenant: TenantId,
    pub aggregate_id: Uuid,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// Snapshot of projected state at a known version, used to resume replay
/// without walking the stream from genesis.
#[derive(Debug, Clone)]
pub struct Snapshot<A> {
    pub state: A,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// Holder of projected state plus the pending (uncommitted) event buffer.
///
/// Not thread-safe by contract: callers load, mutate, and save within a single
/// unit of work per instance. The repository's optimistic version check
/// arbitrates racing saves.
#[derive(Debug)]
pub struct EventSourced<A: Aggregate> {
    tenant: TenantId,
    id: Uuid,
    state: A,
    version: u64,
    created_at: Option<DateTime<Utc>>,
    last_modified_at: Option<DateTime<Utc>>,
    pending: Vec<EventEnvelope<A::Event>>,
}

impl<A: Aggregate> EventSourced<A> {
    /// Fresh instance with no history. The first recorded event becomes
    /// sequence 1.
    pub fn open(tenant: TenantId, id: Uuid) -> Self {
        Self {
            tenant,
            id,
            state: A::default(),
            version: 0,
            created_at: None,
            last_modified_at: None,
            pending: Vec::new(),
        }
    }

    /// Reconstructs state by replaying the full stream in ascending sequence
    /// order. Replay is deterministic: the resulting state is the fold of the
    /// events, however many times it is invoked.
    pub fn load(
        tenant: TenantId,
        id: Uuid,
        events: Vec<EventEnvelope<A::Event>>,
    ) -> Result<Self> {
        let mut aggregate = Self::open(tenant, id);
        aggregate.replay(events)?;
        Ok(aggregate)
    }

    /// Resumes replay from a snapshot rather than from sequence zero. Given a
    /// snapshot consistent with the stream, the end state equals a full
    /// replay from genesis.
    pub fn load_from_snapshot(
        tenant: TenantId,
        id: Uuid,
        snapshot: Snapshot<A>,
        events_after: Vec<EventEnvelope<A::Event>>,
    ) -> Result<Self> {
        let mut aggregate = Self {
            tenant,
            id,
            state: snapshot.state,
            version: snapshot.version,
            created_at: Some(snapshot.created_at),
            last_modified_at: Some(snapshot.last_modified_at),
            pending: Vec::new(),
        };
        aggregate.replay(events_after)?;
        Ok(aggregate)
    }

    fn replay(&mut self, events: Vec<EventEnvelope<A::Event>>) -> Result<()> {
        for envelope in events {
            let expected = self.version + 1;
            if envelope.sequence != expected {
                return Err(CoverError::ReplayOutOfOrder {
                    kind: A::KIND,
                    aggregate_id: self.id.to_string(),
                    expected,
                    found: envelope.sequence,
                });
            }
            self.state.apply(&envelope.event)?;
            self.version = envelope.sequence;
            if self.created_at.is_none() {
                self.created_at = Some(envelope.recorded_at);
            }
            self.last_modified_at = Some(envelope.recorded_at);
        }
        Ok(())
    }

    /// Applies a new event to in-memory state immediately and appends it to
    /// the pending buffer for later persistence, so projected state is always
    /// consistent with the events applied so far, even before commit.
    pub fn record(
        &mut self,
        event: A::Event,
        performing_user_id: Option<Uuid>,
        recorded_at: DateTime<Utc>,
    ) -> std::result::Result<(), DomainError> {
        self.state.apply(&event)?;
        self.version += 1;
        if self.created_at.is_none() {
            self.created_at = Some(recorded_at);
        }
        self.last_modified_at = Some(recorded_at);
        self.pending.push(EventEnvelope {
            tenant: self.tenant.clone(),
            aggregate_id: self.id,
            sequence: self.version,
            performing_user_id,
            recorded_at,
            event,
        });
        Ok(())
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Sequence number of the last applied event; 0 when no event has been
    /// applied yet.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn pending(&self) -> &[EventEnvelope<A::Event>] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drains the uncommitted buffer for persistence.
    pub fn take_pending(&mut self) -> Vec<EventEnvelope<A::Event>> {
        std::mem::take(&mut self.pending)
    }

    pub fn meta(&self) -> AggregateMeta {
        let fallback = Utc::now();
        AggregateMeta {
            tenant: self.tenant.clone(),
            aggregate_id: self.id,
            version: self.version,
            created_at: self.created_at.unwrap_or(fallback),
            last_modified_at: self.last_modified_at.unwrap_or(fallback),
        }
    }

    pub fn read_model(&self) -> A::ReadModel {
        self.state.read_model(&self.meta())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally {
        total: i64,
        closed: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum TallyEvent {
        Added { amount: i64 },
        Closed,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct TallyRow {
        total: i64,
        version: u64,
    }

    impl Aggregate for Tally {
        const KIND: &'static str = "tally";
        type Event = TallyEvent;
        type ReadModel = TallyRow;

        fn apply(&mut self, event: &TallyEvent) -> std::result::Result<(), DomainError> {
            match event {
                TallyEvent::Added { amount } => {
                    if self.closed {
                        return Err(DomainError::OrganisationDeleted);
                    }
                    self.total += amount;
                }
                TallyEvent::Closed => self.closed = true,
            }
            Ok(())
        }

        fn read_model(&self, meta: &AggregateMeta) -> TallyRow {
            TallyRow {
                total: self.total,
                version: meta.version,
            }
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("acme").expect("tenant")
    }

    fn envelope(sequence: u64, event: TallyEvent) -> EventEnvelope<TallyEvent> {
        EventEnvelope {
            tenant: tenant(),
            aggregate_id: Uuid::nil(),
            sequence,
            performing_user_id: None,
            recorded_at: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            event,
        }
    }

    #[test]
    fn tenant_ids_normalize_to_lowercase() {
        let tenant = TenantId::new("  Acme-Broking ").expect("valid tenant");
        assert_eq!(tenant.as_str(), "acme-broking");
    }

    #[test]
    fn tenant_ids_reject_invalid_characters() {
        let err = TenantId::new("acme insurance").unwrap_err();
        assert!(matches!(err, CoverError::InvalidTenantId(_)));
    }

    #[test]
    fn replay_folds_events_in_order() {
        let events = vec![
            envelope(1, TallyEvent::Added { amount: 5 }),
            envelope(2, TallyEvent::Added { amount: -2 }),
        ];
        let aggregate = EventSourced::<Tally>::load(tenant(), Uuid::nil(), events).expect("load");
        assert_eq!(aggregate.state().total, 3);
        assert_eq!(aggregate.version(), 2);
        assert!(!aggregate.has_pending());
    }

    #[test]
    fn replay_is_deterministic_across_invocations() {
        let events = vec![
            envelope(1, TallyEvent::Added { amount: 7 }),
            envelope(2, TallyEvent::Added { amount: 11 }),
            envelope(3, TallyEvent::Closed),
        ];
        let first =
            EventSourced::<Tally>::load(tenant(), Uuid::nil(), events.clone()).expect("load");
        let second = EventSourced::<Tally>::load(tenant(), Uuid::nil(), events).expect("load");
        assert_eq!(first.state(), second.state());
        assert_eq!(first.version(), second.version());
    }

    #[test]
    fn replay_rejects_sequence_gaps() {
        let events = vec![
            envelope(1, TallyEvent::Added { amount: 1 }),
            envelope(3, TallyEvent::Added { amount: 1 }),
        ];
        let err = EventSourced::<Tally>::load(tenant(), Uuid::nil(), events).unwrap_err();
        assert!(matches!(
            err,
            CoverError::ReplayOutOfOrder {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn record_updates_state_and_buffers_the_event() {
        let mut aggregate = EventSourced::<Tally>::open(tenant(), Uuid::nil());
        aggregate
            .record(TallyEvent::Added { amount: 4 }, None, Utc::now())
            .expect("record");
        assert_eq!(aggregate.state().total, 4);
        assert_eq!(aggregate.version(), 1);
        assert_eq!(aggregate.pending().len(), 1);
        assert_eq!(aggregate.pending()[0].sequence, 1);

        let drained = aggregate.take_pending();
        assert_eq!(drained.len(), 1);
        assert!(!aggregate.has_pending());
        assert_eq!(aggregate.version(), 1);
    }

    #[test]
    fn rejected_event_leaves_state_untouched() {
        let mut aggregate = EventSourced::<Tally>::open(tenant(), Uuid::nil());
        aggregate
            .record(TallyEvent::Closed, None, Utc::now())
            .expect("close");
        let err = aggregate
            .record(TallyEvent::Added { amount: 1 }, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::OrganisationDeleted));
        assert_eq!(aggregate.version(), 1);
        assert_eq!(aggregate.pending().len(), 1);
    }

    #[test]
    fn snapshot_resume_matches_full_replay() {
        let all_events = vec![
            envelope(1, TallyEvent::Added { amount: 10 }),
            envelope(2, TallyEvent::Added { amount: 20 }),
            envelope(3, TallyEvent::Added { amount: 30 }),
        ];
        let full =
            EventSourced::<Tally>::load(tenant(), Uuid::nil(), all_events.clone()).expect("full");

        let prefix =
            EventSourced::<Tally>::load(tenant(), Uuid::nil(), all_events[..2].to_vec())
                .expect("prefix");
        let snapshot = Snapshot {
            state: prefix.state().clone(),
            version: prefix.version(),
            created_at: prefix.meta().created_at,
            last_modified_at: prefix.meta().last_modified_at,
        };
        let resumed = EventSourced::<Tally>::load_from_snapshot(
            tenant(),
            Uuid::nil(),
            snapshot,
            all_events[2..].to_vec(),
        )
        .expect("resume");

        assert_eq!(resumed.state(), full.state());
        assert_eq!(resumed.version(), full.version());
    }
}
