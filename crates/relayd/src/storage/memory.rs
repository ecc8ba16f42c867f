//! In-memory storage engine: the reference implementation of kind-class
//! dispatch, retention, and secondary-index maintenance.

use super::{EventStore, InsertOutcome, Query, RejectReason, StorageError};
use aether_core::bloom::BloomFilter;
use aether_core::types::{Event, KindClass};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

type EventId = [u8; 32];
type PubKey = [u8; 32];

struct Indexes {
    immutable: HashMap<EventId, Event>,
    replaceable: HashMap<(PubKey, u16), Event>,
    parameterized: HashMap<(PubKey, u16, String), Event>,
    by_id: HashMap<EventId, Event>,
    by_pubkey: HashMap<PubKey, HashSet<EventId>>,
    by_kind: HashMap<u16, HashSet<EventId>>,
    by_tag: HashMap<(String, String), HashSet<EventId>>,
    bloom: BloomFilter,
}

/// A non-persistent [`EventStore`], matching the kind-class dispatch and
/// index maintenance a persistent backend must also uphold.
pub struct MemoryStore {
    state: RwLock<Indexes>,
    retention_ns: u64,
    now_ns: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl MemoryStore {
    pub fn new(retention_ns: u64, now_ns: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            state: RwLock::new(Indexes {
                immutable: HashMap::new(),
                replaceable: HashMap::new(),
                parameterized: HashMap::new(),
                by_id: HashMap::new(),
                by_pubkey: HashMap::new(),
                by_kind: HashMap::new(),
                by_tag: HashMap::new(),
                bloom: BloomFilter::new(1 << 20, 4),
            }),
            retention_ns,
            now_ns: Box::new(now_ns),
        }
    }

    fn is_expired(&self, event: &Event, now: u64) -> bool {
        self.retention_ns != 0 && now.saturating_sub(event.created_at) > self.retention_ns
    }

    fn prune_expired(state: &mut Indexes, retention_ns: u64, now: u64) {
        if retention_ns == 0 {
            return;
        }
        let expired: Vec<EventId> = state
            .immutable
            .values()
            .filter(|e| now.saturating_sub(e.created_at) > retention_ns)
            .map(|e| e.event_id)
            .collect();
        for id in expired {
            if let Some(event) = state.immutable.remove(&id) {
                remove_indexes(state, &event);
            }
        }
    }

    fn add_indexes(state: &mut Indexes, event: &Event) {
        state.by_id.insert(event.event_id, event.clone());
        state
            .by_pubkey
            .entry(event.pubkey)
            .or_default()
            .insert(event.event_id);
        state
            .by_kind
            .entry(event.kind)
            .or_default()
            .insert(event.event_id);
        for tag in &event.tags {
            for value in &tag.values {
                state
                    .by_tag
                    .entry((tag.key.clone(), value.clone()))
                    .or_default()
                    .insert(event.event_id);
            }
        }
        state.bloom.add(&event.event_id);
    }
}

/// Remove every secondary-index entry for `event`, including all of its
/// tag-value pairs — a stale tag entry left behind on replace is exactly
/// the persistent-backend gap this mirrors against.

fn remove_indexes(state: &mut Indexes, event: &Event) {
    state.by_id.remove(&event.event_id);
    discard_index(&mut state.by_pubkey, &event.pubkey, &event.event_id);
    discard_index(&mut state.by_kind, &event.kind, &event.event_id);
    for tag in &event.tags {
        for value in &tag.values {
            let key = (tag.key.clone(), value.clone());
            discard_index(&mut state.by_tag, &key, &event.event_id);
        }
    }
}

fn discard_index<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, HashSet<EventId>>,
    key: &K,
    id: &EventId,
) where
    K: Clone,
{
    if let Some(set) = index.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

impl EventStore for MemoryStore {
    fn insert(&self, event: Event) -> Result<InsertOutcome, StorageError> {
        let class = match event.kind_class() {
            Ok(c) => c,
            // Validation should have already rejected out-of-range kinds;
            // this is just storage honoring its own documented contract.
            Err(_) => return Ok(InsertOutcome::Rejected(RejectReason::KindOutOfRange)),
        };

        if class == KindClass::Ephemeral {
            return Ok(InsertOutcome::Rejected(RejectReason::Ephemeral));
        }

        let now = (self.now_ns)();
        let mut state = self.state.write();

        match class {
            KindClass::Immutable => {
                // The bloom/by_id duplicate pre-check is specific to the
                // immutable class's identity rule — a replaceable or
                // parameterized event is keyed on (pubkey, kind[, d]), not
                // event_id, so re-publishing the same event_id there is a
                // supersession question for that class's own arm below, not
                // an unconditional duplicate.
                if state.bloom.might_contain(&event.event_id)
                    && state.by_id.contains_key(&event.event_id)
                {
                    return Ok(InsertOutcome::Rejected(RejectReason::Duplicate));
                }
                Self::prune_expired(&mut state, self.retention_ns, now);
                if self.is_expired(&event, now) {
                    return Ok(InsertOutcome::Rejected(RejectReason::Expired));
                }
                if state.immutable.contains_key(&event.event_id) {
                    return Ok(InsertOutcome::Rejected(RejectReason::Duplicate));
                }
                Self::add_indexes(&mut state, &event);
                state.immutable.insert(event.event_id, event);
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Replaceable => {
                let key = (event.pubkey, event.kind);
                if let Some(existing) = state.replaceable.get(&key) {
                    if existing.created_at >= event.created_at {
                        return Ok(InsertOutcome::Rejected(RejectReason::Superseded));
                    }
                    let existing = existing.clone();
                    remove_indexes(&mut state, &existing);
                }
                Self::add_indexes(&mut state, &event);
                state.replaceable.insert(key, event);
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Parameterized => {
                let key = (event.pubkey, event.kind, super::d_tag(&event));
                if let Some(existing) = state.parameterized.get(&key) {
                    if existing.created_at >= event.created_at {
                        return Ok(InsertOutcome::Rejected(RejectReason::Superseded));
                    }
                    let existing = existing.clone();
                    remove_indexes(&mut state, &existing);
                }
                Self::add_indexes(&mut state, &event);
                state.parameterized.insert(key, event);
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Ephemeral => unreachable!("handled above"),
        }
    }

    fn query(&self, query: &Query) -> Result<Vec<Event>, StorageError> {
        let now = (self.now_ns)();
        let mut state = self.state.write();
        Self::prune_expired(&mut state, self.retention_ns, now);
        drop(state);
        let state = self.state.read();

        let mut candidates: Option<HashSet<EventId>> = None;

        let intersect = |current: Option<HashSet<EventId>>, next: HashSet<EventId>| match current {
            None => Some(next),
            Some(existing) => Some(existing.intersection(&next).copied().collect()),
        };

        if let Some(tags) = &query.tags {
            let mut matched: HashSet<EventId> = HashSet::new();
            for (key, value) in tags {
                if let Some(ids) = state.by_tag.get(&(key.clone(), value.clone())) {
                    matched.extend(ids);
                }
            }
            candidates = intersect(candidates, matched);
        }
        if let Some(pubkeys) = &query.pubkeys {
            let mut matched: HashSet<EventId> = HashSet::new();
            for pubkey in pubkeys {
                if let Some(ids) = state.by_pubkey.get(pubkey) {
                    matched.extend(ids);
                }
            }
            candidates = intersect(candidates, matched);
        }
        if let Some(kinds) = &query.kinds {
            let mut matched: HashSet<EventId> = HashSet::new();
            for kind in kinds {
                if let Some(ids) = state.by_kind.get(kind) {
                    matched.extend(ids);
                }
            }
            candidates = intersect(candidates, matched);
        }

        let ids: Vec<EventId> = match candidates {
            Some(set) => set.into_iter().collect(),
            None => state.by_id.keys().copied().collect(),
        };

        let mut out: Vec<Event> = ids
            .into_iter()
            .filter_map(|id| state.by_id.get(&id).cloned())
            .filter(|event| {
                query.since.map_or(true, |since| event.created_at >= since)
                    && query.until.map_or(true, |until| event.created_at <= until)
            })
            .collect();
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    fn has_event(&self, event_id: &[u8; 32]) -> Result<bool, StorageError> {
        Ok(self.state.read().by_id.contains_key(event_id))
    }

    fn event_count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().by_id.len())
    }
}
