//! The triple-store index API the engine consumes.
//!
//! The engine never touches persistence directly; it reads through this
//! trait, bound by the caller to a consistent snapshot. All scan methods
//! return lazy streams — candidate sets are pulled, never materialized by
//! the engine.
//!
//! Write notification is a broadcast channel: `watch_writes` hands out a
//! receiver, and dropping the receiver is the unsubscribe handle. Batches
//! are grouped per source transaction.

mod memory;

pub use memory::InMemoryTripleStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::types::{Direction, EntityId, Timestamp, Triple, Value};

/// A lazy stream of triples from an index scan.
pub type TripleStream = BoxStream<'static, Result<Triple, StoreError>>;

/// One transaction's worth of writes.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub inserts: Vec<Triple>,
    pub deletes: Vec<Triple>,
}

impl WriteBatch {
    /// All triples in the batch, inserts then deletes.
    pub fn triples(&self) -> impl Iterator<Item = &Triple> {
        self.inserts.iter().chain(self.deletes.iter())
    }
}

/// Bounds for an ordered attribute scan.
///
/// Value bounds compare the indexed value alone; cursor bounds compare the
/// `(value, entity_id)` pair, which is how an after-cursor translates into
/// an index seek.
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub direction: Direction,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub gt_cursor: Option<(Value, EntityId)>,
    pub gte_cursor: Option<(Value, EntityId)>,
    pub lt_cursor: Option<(Value, EntityId)>,
    pub lte_cursor: Option<(Value, EntityId)>,
}

impl Default for RangeRequest {
    fn default() -> Self {
        Self {
            direction: Direction::Asc,
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            gt_cursor: None,
            gte_cursor: None,
            lt_cursor: None,
            lte_cursor: None,
        }
    }
}

impl RangeRequest {
    #[must_use]
    pub fn directed(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }
}

/// Comparison for client-clock scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockCmp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// The index API of a triple store, bound to a consistent snapshot.
#[async_trait]
pub trait TripleStore: Send + Sync {
    /// Attribute-value-entity exact lookup. The key starts with the
    /// collection name, then path segments; set lookups carry the encoded
    /// member as the final segment and pass `None` for the value.
    ///
    /// Value lookups must only surface the current winner per
    /// `(entity, attribute)`; the engine skips re-evaluating clauses this
    /// index fulfilled, which superseded entries would break.
    async fn find_by_ave(
        &self,
        key: &[String],
        value: Option<&Value>,
    ) -> Result<TripleStream, StoreError>;

    /// Ordered scan over one attribute's values.
    async fn find_values_in_range(
        &self,
        key: &[String],
        range: &RangeRequest,
    ) -> Result<TripleStream, StoreError>;

    /// Every triple of one entity.
    async fn find_by_entity(&self, entity_id: &EntityId) -> Result<TripleStream, StoreError>;

    /// Triples from one client, filtered against a timestamp bound.
    async fn find_by_client_timestamp(
        &self,
        client_id: &str,
        cmp: ClockCmp,
        bound: Option<&Timestamp>,
    ) -> Result<TripleStream, StoreError>;

    /// Every client id that has written at least one triple.
    async fn find_all_client_ids(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Subscribe to write batches. Dropping the receiver unsubscribes.
    fn watch_writes(&self) -> broadcast::Receiver<WriteBatch>;
}
