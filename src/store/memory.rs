//! Deterministic in-memory triple store.
//!
//! Serves reads from `BTreeMap` orderings so scans are reproducible, which
//! the engine's tests rely on. The AVE index holds only the current winner
//! per `(entity, attribute)`; superseded values are unindexed but stay in
//! the per-entity log for state-vector-bounded materialization.
//!
//! Not a persistence layer. Real deployments implement `TripleStore` over
//! their own storage and hand the engine a snapshot-bound instance.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::types::{AttributePath, Direction, EntityId, Timestamp, Triple, Value};

use super::{ClockCmp, RangeRequest, TripleStore, TripleStream, WriteBatch};

/// Broadcast capacity for write batches. Slow subscribers that fall this
/// far behind observe a lagged receiver and resynchronize with a re-fetch.
const WRITE_CHANNEL_CAPACITY: usize = 256;

/// AVE index key: `(collection + path, encoded value, entity)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AveKey {
    attr: Vec<String>,
    value: Vec<u8>,
    entity: EntityId,
}

#[derive(Default)]
struct Inner {
    /// Full per-entity triple log, every version retained.
    by_entity: BTreeMap<EntityId, Vec<Triple>>,
    /// Current winner per `(entity, attribute)`, keyed for AVE scans.
    ave: BTreeMap<AveKey, Triple>,
    /// Winning timestamp per `(entity, attr)` and, when the winner is not a
    /// retraction, the AVE key indexing it. Retractions keep their
    /// timestamp here so an out-of-order older write cannot re-index.
    current: HashMap<(EntityId, AttributePath), (Timestamp, Option<AveKey>)>,
}

impl Inner {
    fn insert(&mut self, triple: &Triple) {
        self.by_entity
            .entry(triple.entity_id.clone())
            .or_default()
            .push(triple.clone());
        self.index(triple);
    }

    fn index(&mut self, triple: &Triple) {
        let slot = (triple.entity_id.clone(), triple.attribute.clone());
        if let Some((winner_ts, indexed)) = self.current.get(&slot) {
            if *winner_ts >= triple.timestamp {
                return;
            }
            if let Some(stale) = indexed.clone() {
                self.ave.remove(&stale);
            }
        }
        if triple.retracted {
            self.current.insert(slot, (triple.timestamp.clone(), None));
        } else {
            let key = ave_key(triple);
            self.ave.insert(key.clone(), triple.clone());
            self.current
                .insert(slot, (triple.timestamp.clone(), Some(key)));
        }
    }

    fn delete(&mut self, triple: &Triple) {
        let mut remaining: Vec<Triple> = Vec::new();
        if let Some(log) = self.by_entity.get_mut(&triple.entity_id) {
            log.retain(|stored| {
                stored.attribute != triple.attribute || stored.timestamp != triple.timestamp
            });
            remaining = log
                .iter()
                .filter(|stored| stored.attribute == triple.attribute)
                .cloned()
                .collect();
            if log.is_empty() {
                self.by_entity.remove(&triple.entity_id);
            }
        }

        // Re-derive the winner for the slot from what is left.
        let slot = (triple.entity_id.clone(), triple.attribute.clone());
        if let Some((_, Some(key))) = self.current.remove(&slot) {
            self.ave.remove(&key);
        }
        for survivor in &remaining {
            self.index(survivor);
        }
    }
}

fn ave_key(triple: &Triple) -> AveKey {
    let mut attr = Vec::with_capacity(triple.attribute.len() + 1);
    attr.push(triple.entity_id.collection().to_owned());
    attr.extend(triple.attribute.segments().iter().cloned());
    AveKey {
        attr,
        value: triple.value.encode(),
        entity: triple.entity_id.clone(),
    }
}

/// In-memory `TripleStore` with write broadcast.
pub struct InMemoryTripleStore {
    inner: RwLock<Inner>,
    writes: broadcast::Sender<WriteBatch>,
}

impl Default for InMemoryTripleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTripleStore {
    #[must_use]
    pub fn new() -> Self {
        let (writes, _) = broadcast::channel(WRITE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            writes,
        }
    }

    /// Apply one transaction's writes and notify watchers.
    pub fn apply(&self, batch: WriteBatch) {
        {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for triple in &batch.inserts {
                inner.insert(triple);
            }
            for triple in &batch.deletes {
                inner.delete(triple);
            }
        }
        // No receivers is fine; subscriptions come and go.
        let _ = self.writes.send(batch);
    }

    /// Insert triples as a single batch.
    pub fn insert_triples(&self, triples: Vec<Triple>) {
        self.apply(WriteBatch {
            inserts: triples,
            deletes: Vec::new(),
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stream_of(triples: Vec<Triple>) -> TripleStream {
    futures::stream::iter(triples.into_iter().map(Ok)).boxed()
}

/// Compare a `(value, entity)` pair against a cursor.
fn cursor_cmp(value: &Value, entity: &EntityId, cursor: &(Value, EntityId)) -> std::cmp::Ordering {
    value
        .cmp_total(&cursor.0)
        .then_with(|| entity.cmp(&cursor.1))
}

fn within_range(triple: &Triple, range: &RangeRequest) -> bool {
    use std::cmp::Ordering::{Greater, Less};

    let value = &triple.value;
    let entity = &triple.entity_id;

    if let Some(bound) = &range.gt {
        if value.cmp_total(bound) != Greater {
            return false;
        }
    }
    if let Some(bound) = &range.gte {
        if value.cmp_total(bound) == Less {
            return false;
        }
    }
    if let Some(bound) = &range.lt {
        if value.cmp_total(bound) != Less {
            return false;
        }
    }
    if let Some(bound) = &range.lte {
        if value.cmp_total(bound) == Greater {
            return false;
        }
    }
    if let Some(cursor) = &range.gt_cursor {
        if cursor_cmp(value, entity, cursor) != Greater {
            return false;
        }
    }
    if let Some(cursor) = &range.gte_cursor {
        if cursor_cmp(value, entity, cursor) == Less {
            return false;
        }
    }
    if let Some(cursor) = &range.lt_cursor {
        if cursor_cmp(value, entity, cursor) != Less {
            return false;
        }
    }
    if let Some(cursor) = &range.lte_cursor {
        if cursor_cmp(value, entity, cursor) == Greater {
            return false;
        }
    }
    true
}

#[async_trait]
impl TripleStore for InMemoryTripleStore {
    async fn find_by_ave(
        &self,
        key: &[String],
        value: Option<&Value>,
    ) -> Result<TripleStream, StoreError> {
        let wanted = value.map(Value::encode);
        let inner = self.read();
        let matches: Vec<Triple> = inner
            .ave
            .range(
                AveKey {
                    attr: key.to_vec(),
                    value: Vec::new(),
                    entity: EntityId(String::new()),
                }..,
            )
            .take_while(|(ave, _)| ave.attr == key)
            .filter(|(ave, _)| wanted.as_ref().is_none_or(|w| &ave.value == w))
            .map(|(_, triple)| triple.clone())
            .collect();
        Ok(stream_of(matches))
    }

    async fn find_values_in_range(
        &self,
        key: &[String],
        range: &RangeRequest,
    ) -> Result<TripleStream, StoreError> {
        let inner = self.read();
        let mut matches: Vec<Triple> = inner
            .ave
            .range(
                AveKey {
                    attr: key.to_vec(),
                    value: Vec::new(),
                    entity: EntityId(String::new()),
                }..,
            )
            .take_while(|(ave, _)| ave.attr == key)
            .filter(|(_, triple)| within_range(triple, range))
            .map(|(_, triple)| triple.clone())
            .collect();
        if range.direction == Direction::Desc {
            matches.reverse();
        }
        Ok(stream_of(matches))
    }

    async fn find_by_entity(&self, entity_id: &EntityId) -> Result<TripleStream, StoreError> {
        let inner = self.read();
        let triples = inner.by_entity.get(entity_id).cloned().unwrap_or_default();
        Ok(stream_of(triples))
    }

    async fn find_by_client_timestamp(
        &self,
        client_id: &str,
        cmp: ClockCmp,
        bound: Option<&Timestamp>,
    ) -> Result<TripleStream, StoreError> {
        let inner = self.read();
        let mut matches: Vec<Triple> = inner
            .by_entity
            .values()
            .flatten()
            .filter(|triple| triple.timestamp.client_id == client_id)
            .filter(|triple| match bound {
                None => true,
                Some(bound) => match cmp {
                    ClockCmp::Gt => triple.timestamp > *bound,
                    ClockCmp::Gte => triple.timestamp >= *bound,
                    ClockCmp::Lt => triple.timestamp < *bound,
                    ClockCmp::Lte => triple.timestamp <= *bound,
                },
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(stream_of(matches))
    }

    async fn find_all_client_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        let inner = self.read();
        Ok(inner
            .by_entity
            .values()
            .flatten()
            .map(|triple| triple.timestamp.client_id.as_str().to_owned())
            .collect())
    }

    fn watch_writes(&self) -> broadcast::Receiver<WriteBatch> {
        self.writes.subscribe()
    }
}
