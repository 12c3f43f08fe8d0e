//! Common helpers for end-to-end tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use crate::engine::{Engine, FetchResult};
use crate::store::{InMemoryTripleStore, WriteBatch};
use crate::types::{AttributePath, EntityId, Timestamp, Triple, Value, COLLECTION_ATTRIBUTE};

static TRACING: Once = Once::new();

/// Route engine tracing to the test writer, once per process.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A fresh engine over a fresh in-memory store.
pub fn new_engine() -> (Engine<InMemoryTripleStore>, Arc<InMemoryTripleStore>) {
    init_tracing();
    let store = Arc::new(InMemoryTripleStore::new());
    (Engine::new(Arc::clone(&store)), store)
}

/// Build the triples for one entity: the collection marker plus one triple
/// per attribute pair, all at `(tick, client)`.
pub fn entity_triples(
    collection: &str,
    external_id: &str,
    pairs: &[(&str, Value)],
    tick: u64,
    client: &str,
) -> Vec<Triple> {
    let id = EntityId::new(collection, external_id);
    let ts = Timestamp::new(tick, client);
    let mut triples = vec![Triple::new(
        id.clone(),
        AttributePath::collection_marker(),
        Value::String(collection.to_owned()),
        ts.clone(),
    )];
    for (path, value) in pairs {
        triples.push(Triple::new(
            id.clone(),
            AttributePath::parse(path),
            value.clone(),
            ts.clone(),
        ));
    }
    triples
}

/// Insert one entity as a single write batch.
pub fn insert_entity(
    store: &InMemoryTripleStore,
    collection: &str,
    external_id: &str,
    pairs: &[(&str, Value)],
    tick: u64,
    client: &str,
) {
    store.insert_triples(entity_triples(collection, external_id, pairs, tick, client));
}

/// Tombstone an entity: `_collection = null` with a winning timestamp.
pub fn tombstone_triple(collection: &str, external_id: &str, tick: u64, client: &str) -> Triple {
    Triple::new(
        EntityId::new(collection, external_id),
        AttributePath::collection_marker(),
        Value::Null,
        Timestamp::new(tick, client),
    )
}

pub fn apply(store: &InMemoryTripleStore, inserts: Vec<Triple>) {
    store.apply(WriteBatch {
        inserts,
        deletes: Vec::new(),
    });
}

/// External ids of a fetch result, in result order.
pub fn external_ids(result: &FetchResult) -> Vec<String> {
    result
        .results
        .keys()
        .map(|id| id.external_id().to_owned())
        .collect()
}

/// Poll until `condition` holds or two seconds elapse.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Whether a triple list carries the collection tombstone for an entity.
pub fn has_tombstone(triples: &[Triple], entity_id: &EntityId) -> bool {
    triples.iter().any(|triple| {
        triple.entity_id == *entity_id
            && triple.attribute.first() == Some(COLLECTION_ATTRIBUTE)
            && triple.value == Value::Null
    })
}
