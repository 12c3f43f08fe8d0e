//! Tombstones: fetch drops the entity, subscribers see the retraction.

use std::sync::{Arc, Mutex};

use super::helpers::{
    apply, external_ids, has_tombstone, insert_entity, new_engine, tombstone_triple, wait_until,
};
use crate::engine::{FetchOptions, SubscriptionUpdate};
use crate::types::{EntityId, Filter, Op, Query, Value};

fn by_id_query() -> Query {
    Query::new("users").filter(Filter::stmt("id", Op::Eq, Value::String("1".into())))
}

#[tokio::test]
async fn test_fetch_drops_tombstoned_entity_but_keeps_triples() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");

    let live = engine
        .fetch(&by_id_query(), &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(external_ids(&live), ["1"]);

    apply(&store, vec![tombstone_triple("users", "1", 5, "a")]);

    let gone = engine
        .fetch(&by_id_query(), &FetchOptions::default())
        .await
        .expect("fetch");
    assert!(gone.results.is_empty());

    // Dropped after capture: the result-triple set still carries the
    // retraction for subscribers.
    let triples = gone
        .triples
        .get(&EntityId::from("users#1"))
        .expect("triples captured");
    assert!(has_tombstone(triples, &EntityId::from("users#1")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscription_emits_removal_with_tombstone() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");

    let updates: Arc<Mutex<Vec<SubscriptionUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let handle = engine.subscribe_results_and_triples(
        by_id_query(),
        FetchOptions::default(),
        move |update| sink.lock().expect("lock").push(update.clone()),
        None,
    );

    let seeded = wait_until(|| {
        updates
            .lock()
            .expect("lock")
            .last()
            .is_some_and(|u| u.results.len() == 1)
    })
    .await;
    assert!(seeded, "initial result should arrive");

    apply(&store, vec![tombstone_triple("users", "1", 5, "a")]);

    let removed = wait_until(|| {
        updates
            .lock()
            .expect("lock")
            .last()
            .is_some_and(|u| u.results.is_empty())
    })
    .await;
    assert!(removed, "removal should be emitted");

    let updates = updates.lock().expect("lock");
    let last = updates.last().expect("at least one update");
    let triples = last
        .triples
        .get(&EntityId::from("users#1"))
        .expect("removal carries triples");
    assert!(has_tombstone(triples, &EntityId::from("users#1")));

    handle.unsubscribe();
}
