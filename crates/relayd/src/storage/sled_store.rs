//! A persistent [`EventStore`] backed by `sled`.
//!
//! Maintains the same by-pubkey/by-kind/by-tag index trees the in-memory
//! store keeps, including removing every stale index entry on a replace
//! — the in-memory store is the reference for what "full parity" means
//! here.

use super::{EventStore, InsertOutcome, Query, RejectReason, StorageError};
use aether_core::types::{Event, KindClass};
use std::collections::HashSet;

/// Key prefixes within the `indexes` tree.
mod prefix {
    pub const PUBKEY: u8 = 0;
    pub const KIND: u8 = 1;
    pub const TAG: u8 = 2;
}

pub struct SledStore {
    db: sled::Db,
    events: sled::Tree,
    replaceable: sled::Tree,
    parameterized: sled::Tree,
    indexes: sled::Tree,
    retention_ns: u64,
    now_ns: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl SledStore {
    pub fn open(
        path: impl AsRef<std::path::Path>,
        retention_ns: u64,
        now_ns: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let events = db.open_tree("events")?;
        let replaceable = db.open_tree("replaceable")?;
        let parameterized = db.open_tree("parameterized")?;
        let indexes = db.open_tree("indexes")?;
        Ok(Self {
            db,
            events,
            replaceable,
            parameterized,
            indexes,
            retention_ns,
            now_ns: Box::new(now_ns),
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn replaceable_key(pubkey: &[u8; 32], kind: u16) -> Vec<u8> {
        let mut key = Vec::with_capacity(34);
        key.extend_from_slice(pubkey);
        key.extend_from_slice(&kind.to_be_bytes());
        key
    }

    fn parameterized_key(pubkey: &[u8; 32], kind: u16, d_tag: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(34 + d_tag.len());
        key.extend_from_slice(pubkey);
        key.extend_from_slice(&kind.to_be_bytes());
        key.extend_from_slice(d_tag.as_bytes());
        key
    }

    /// Builds `[prefix] ++ u32_be(discriminant.len()) ++ discriminant ++ event_id`.
    /// The length prefix keeps discriminants of different lengths from ever
    /// sharing a byte range — without it, `("e","x")` and `("e","xy")` share
    /// the same leading bytes and a range scan over one would catch entries
    /// belonging to the other.
    fn index_key(prefix: u8, discriminant: &[u8], event_id: &[u8; 32]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 4 + discriminant.len() + 32);
        key.push(prefix);
        key.extend_from_slice(&(discriminant.len() as u32).to_be_bytes());
        key.extend_from_slice(discriminant);
        key.extend_from_slice(event_id);
        key
    }

    /// The key prefix shared by every index entry for `discriminant` under
    /// `prefix`, with no event id appended yet.
    fn index_key_prefix(prefix: u8, discriminant: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 4 + discriminant.len());
        key.push(prefix);
        key.extend_from_slice(&(discriminant.len() as u32).to_be_bytes());
        key.extend_from_slice(discriminant);
        key
    }

    fn add_indexes(&self, event: &Event) -> Result<(), StorageError> {
        self.indexes.insert(
            Self::index_key(prefix::PUBKEY, &event.pubkey, &event.event_id),
            &[],
        )?;
        self.indexes.insert(
            Self::index_key(prefix::KIND, &event.kind.to_be_bytes(), &event.event_id),
            &[],
        )?;
        for tag in &event.tags {
            for value in &tag.values {
                let discriminant = tag_discriminant(&tag.key, value);
                self.indexes
                    .insert(Self::index_key(prefix::TAG, &discriminant, &event.event_id), &[])?;
            }
        }
        Ok(())
    }

    /// Remove every index entry for `event`, mirroring
    /// [`super::memory::MemoryStore`]'s replace path — a persistent
    /// backend that only removed the primary record would leak stale tag
    /// entries on every replace.
    fn remove_indexes(&self, event: &Event) -> Result<(), StorageError> {
        self.indexes
            .remove(Self::index_key(prefix::PUBKEY, &event.pubkey, &event.event_id))?;
        self.indexes.remove(Self::index_key(
            prefix::KIND,
            &event.kind.to_be_bytes(),
            &event.event_id,
        ))?;
        for tag in &event.tags {
            for value in &tag.values {
                let discriminant = tag_discriminant(&tag.key, value);
                self.indexes
                    .remove(Self::index_key(prefix::TAG, &discriminant, &event.event_id))?;
            }
        }
        Ok(())
    }

    fn load_event(&self, event_id: &[u8; 32]) -> Result<Option<Event>, StorageError> {
        match self.events.get(event_id)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_event(&self, event: &Event) -> Result<(), StorageError> {
        self.events
            .insert(event.event_id, postcard::to_allocvec(event)?)?;
        Ok(())
    }

    /// Sweep previously-stored immutable events that have aged past
    /// retention. `MemoryStore` does this on every insert and query;
    /// without it a persistent backend would keep serving (and counting)
    /// events the in-memory backend would have already dropped.
    fn prune_expired(&self) -> Result<(), StorageError> {
        if self.retention_ns == 0 {
            return Ok(());
        }
        let now = (self.now_ns)();
        let mut expired = Vec::new();
        for entry in self.events.iter() {
            let (_, bytes) = entry?;
            let event: Event = postcard::from_bytes(&bytes)?;
            if matches!(event.kind_class(), Ok(KindClass::Immutable))
                && now.saturating_sub(event.created_at) > self.retention_ns
            {
                expired.push(event);
            }
        }
        for event in expired {
            self.events.remove(event.event_id)?;
            self.remove_indexes(&event)?;
        }
        Ok(())
    }

    /// Every event id indexed under exactly `discriminant` (never a
    /// byte-prefix of it — the length prefix in [`Self::index_key`] makes
    /// every key in range share the same discriminant). The upper bound is
    /// the discriminant followed by the maximum possible 32-byte event id,
    /// so an id whose leading byte is `0xff` still falls inside the range.
    fn ids_with_index_prefix(&self, prefix: u8, discriminant: &[u8]) -> Result<HashSet<[u8; 32]>, StorageError> {
        let start = Self::index_key_prefix(prefix, discriminant);
        let mut end = start.clone();
        end.extend_from_slice(&[0xffu8; 32]);
        let mut ids = HashSet::new();
        for entry in self.indexes.range(start..=end) {
            let (key, _) = entry?;
            if key.len() >= 32 {
                let id_bytes = &key[key.len() - 32..];
                let mut id = [0u8; 32];
                id.copy_from_slice(id_bytes);
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}

fn tag_discriminant(key: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + value.len() + 1);
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    out.extend_from_slice(value.as_bytes());
    out
}

impl EventStore for SledStore {
    fn insert(&self, event: Event) -> Result<InsertOutcome, StorageError> {
        let class = match event.kind_class() {
            Ok(c) => c,
            Err(_) => return Ok(InsertOutcome::Rejected(RejectReason::KindOutOfRange)),
        };
        if class == KindClass::Ephemeral {
            return Ok(InsertOutcome::Rejected(RejectReason::Ephemeral));
        }

        let now = (self.now_ns)();

        match class {
            KindClass::Immutable => {
                if self.retention_ns != 0 && now.saturating_sub(event.created_at) > self.retention_ns
                {
                    return Ok(InsertOutcome::Rejected(RejectReason::Expired));
                }
                self.prune_expired()?;
                if self.events.contains_key(event.event_id)? {
                    return Ok(InsertOutcome::Rejected(RejectReason::Duplicate));
                }
                self.store_event(&event)?;
                self.add_indexes(&event)?;
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Replaceable => {
                let key = Self::replaceable_key(&event.pubkey, event.kind);
                if let Some(existing_id) = self.replaceable.get(&key)? {
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&existing_id);
                    if let Some(existing) = self.load_event(&id)? {
                        if existing.created_at >= event.created_at {
                            return Ok(InsertOutcome::Rejected(RejectReason::Superseded));
                        }
                        self.remove_indexes(&existing)?;
                        self.events.remove(existing.event_id)?;
                    }
                }
                self.store_event(&event)?;
                self.add_indexes(&event)?;
                self.replaceable.insert(key, &event.event_id)?;
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Parameterized => {
                let d = super::d_tag(&event);
                let key = Self::parameterized_key(&event.pubkey, event.kind, &d);
                if let Some(existing_id) = self.parameterized.get(&key)? {
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&existing_id);
                    if let Some(existing) = self.load_event(&id)? {
                        if existing.created_at >= event.created_at {
                            return Ok(InsertOutcome::Rejected(RejectReason::Superseded));
                        }
                        self.remove_indexes(&existing)?;
                        self.events.remove(existing.event_id)?;
                    }
                }
                self.store_event(&event)?;
                self.add_indexes(&event)?;
                self.parameterized.insert(key, &event.event_id)?;
                Ok(InsertOutcome::Admitted)
            }
            KindClass::Ephemeral => unreachable!("handled above"),
        }
    }

    fn query(&self, query: &Query) -> Result<Vec<Event>, StorageError> {
        self.prune_expired()?;
        let mut candidates: Option<HashSet<[u8; 32]>> = None;

        let mut intersect = |current: Option<HashSet<[u8; 32]>>, next: HashSet<[u8; 32]>| match current {
            None => Some(next),
            Some(existing) => Some(existing.intersection(&next).copied().collect()),
        };

        if let Some(tags) = &query.tags {
            let mut matched = HashSet::new();
            for (key, value) in tags {
                matched.extend(self.ids_with_index_prefix(prefix::TAG, &tag_discriminant(key, value))?);
            }
            candidates = intersect(candidates, matched);
        }
        if let Some(pubkeys) = &query.pubkeys {
            let mut matched = HashSet::new();
            for pubkey in pubkeys {
                matched.extend(self.ids_with_index_prefix(prefix::PUBKEY, pubkey)?);
            }
            candidates = intersect(candidates, matched);
        }
        if let Some(kinds) = &query.kinds {
            let mut matched = HashSet::new();
            for kind in kinds {
                matched.extend(self.ids_with_index_prefix(prefix::KIND, &kind.to_be_bytes())?);
            }
            candidates = intersect(candidates, matched);
        }

        let ids: Vec<[u8; 32]> = match candidates {
            Some(set) => set.into_iter().collect(),
            None => self
                .events
                .iter()
                .keys()
                .filter_map(|k| k.ok())
                .map(|k| {
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&k);
                    id
                })
                .collect(),
        };

        let mut out = Vec::new();
        for id in ids {
            if let Some(event) = self.load_event(&id)? {
                if query.since.map_or(true, |since| event.created_at >= since)
                    && query.until.map_or(true, |until| event.created_at <= until)
                {
                    out.push(event);
                }
            }
        }
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    fn has_event(&self, event_id: &[u8; 32]) -> Result<bool, StorageError> {
        Ok(self.events.contains_key(event_id)?)
    }

    fn event_count(&self) -> Result<usize, StorageError> {
        Ok(self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::types::Tag;
    use tempfile::tempdir;

    fn event(kind: u16, pubkey: [u8; 32], created_at: u64, id: u8, tags: Vec<Tag>) -> Event {
        Event {
            event_id: [id; 32],
            pubkey,
            created_at,
            kind,
            tags,
            content: vec![],
            sig: [0u8; 64],
            pow_nonce: None,
        }
    }

    #[test]
    fn replace_removes_stale_tag_index() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path(), 0, || 1_000_000).unwrap();
        let pubkey = [9; 32];
        let old = event(10_000, pubkey, 100, 1, vec![Tag::new("e", vec!["old".into()])]);
        let new = event(10_000, pubkey, 200, 2, vec![Tag::new("e", vec!["new".into()])]);
        store.insert(old).unwrap();
        store.insert(new).unwrap();

        let by_old = store
            .query(&Query {
                tags: Some(vec![("e".into(), "old".into())]),
                ..Default::default()
            })
            .unwrap();
        assert!(by_old.is_empty());

        let by_new = store
            .query(&Query {
                tags: Some(vec![("e".into(), "new".into())]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_new.len(), 1);
    }

    #[test]
    fn query_sweeps_previously_stored_events_that_aged_past_retention() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let retention_ns = 1_000;
        let clock = Arc::new(AtomicU64::new(100));
        let clock_for_store = Arc::clone(&clock);
        let store = SledStore::open(dir.path(), retention_ns, move || clock_for_store.load(Ordering::SeqCst)).unwrap();

        let e = event(1, [3; 32], 100, 1, vec![]);
        store.insert(e).unwrap();
        assert_eq!(store.event_count().unwrap(), 1);

        clock.store(100 + retention_ns + 1, Ordering::SeqCst);
        let results = store.query(&Query::default()).unwrap();
        assert!(results.is_empty());
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn duplicate_immutable_event_rejected() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path(), 0, || 1_000_000).unwrap();
        let e = event(1, [1; 32], 100, 1, vec![]);
        assert_eq!(store.insert(e.clone()).unwrap(), InsertOutcome::Admitted);
        assert_eq!(
            store.insert(e).unwrap(),
            InsertOutcome::Rejected(RejectReason::Duplicate)
        );
    }

    #[test]
    fn tag_query_does_not_match_values_that_are_byte_prefixes() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path(), 0, || 1_000_000).unwrap();
        let x = event(1, [8; 32], 100, 1, vec![Tag::new("e", vec!["x".into()])]);
        let xy = event(1, [8; 32], 100, 2, vec![Tag::new("e", vec!["xy".into()])]);
        store.insert(x.clone()).unwrap();
        store.insert(xy).unwrap();

        let results = store
            .query(&Query {
                tags: Some(vec![("e".into(), "x".into())]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results, vec![x], "query for \"x\" must not match \"xy\"");
    }

    #[test]
    fn event_id_with_leading_0xff_byte_is_reachable_via_every_index() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path(), 0, || 1_000_000).unwrap();
        let pubkey = [9; 32];
        let e = event(1, pubkey, 100, 0xff, vec![Tag::new("e", vec!["x".into()])]);
        store.insert(e.clone()).unwrap();

        assert_eq!(
            store.query(&Query { pubkeys: Some(vec![pubkey]), ..Default::default() }).unwrap(),
            vec![e.clone()]
        );
        assert_eq!(
            store.query(&Query { kinds: Some(vec![1]), ..Default::default() }).unwrap(),
            vec![e.clone()]
        );
        assert_eq!(
            store
                .query(&Query { tags: Some(vec![("e".into(), "x".into())]), ..Default::default() })
                .unwrap(),
            vec![e]
        );
    }
}
