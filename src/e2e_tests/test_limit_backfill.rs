//! Limit-window maintenance and back-fill.

use std::sync::{Arc, Mutex};

use super::helpers::{apply, insert_entity, new_engine, tombstone_triple, wait_until};
use crate::engine::FetchOptions;
use crate::types::{OrderKey, Query, Value};

fn ranked(store: &crate::store::InMemoryTripleStore) {
    for (id, rank) in [("1", 10.0), ("2", 20.0), ("3", 30.0)] {
        insert_entity(store, "posts", id, &[("rank", Value::Number(rank))], 1, "a");
    }
}

fn window_query() -> Query {
    Query::new("posts").order_by(OrderKey::asc("rank")).limit(2)
}

fn snapshot(updates: &Mutex<Vec<Vec<String>>>) -> Vec<String> {
    updates
        .lock()
        .expect("lock")
        .last()
        .cloned()
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removal_backfills_from_store() {
    let (engine, store) = new_engine();
    ranked(&store);

    let updates: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let handle = engine.subscribe(
        window_query(),
        FetchOptions::default(),
        move |results| {
            let ids = results
                .iter()
                .map(|(id, _)| id.external_id().to_owned())
                .collect();
            sink.lock().expect("lock").push(ids);
        },
        None,
    );

    let seeded = wait_until(|| snapshot(&updates) == ["1", "2"]).await;
    assert!(seeded, "window should start as [1, 2]");

    // Tombstoning #1 shrinks the window; back-fill walks past the last
    // remaining entry and pulls #3.
    apply(&store, vec![tombstone_triple("posts", "1", 5, "a")]);

    let refilled = wait_until(|| snapshot(&updates) == ["2", "3"]).await;
    assert!(refilled, "window should back-fill to [2, 3]");

    handle.unsubscribe();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_into_window_evicts_tail() {
    let (engine, store) = new_engine();
    ranked(&store);

    let updates: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let handle = engine.subscribe(
        window_query(),
        FetchOptions::default(),
        move |results| {
            let ids = results
                .iter()
                .map(|(id, _)| id.external_id().to_owned())
                .collect();
            sink.lock().expect("lock").push(ids);
        },
        None,
    );

    let seeded = wait_until(|| snapshot(&updates) == ["1", "2"]).await;
    assert!(seeded);

    // Rank 5 sorts before the whole window.
    insert_entity(&store, "posts", "0", &[("rank", Value::Number(5.0))], 6, "a");

    let shifted = wait_until(|| snapshot(&updates) == ["0", "1"]).await;
    assert!(shifted, "new head should enter, tail should fall out");

    // A write past the window must not disturb it.
    insert_entity(&store, "posts", "9", &[("rank", Value::Number(90.0))], 7, "a");
    let stable = wait_until(|| snapshot(&updates) == ["0", "1"]).await;
    assert!(stable);

    handle.unsubscribe();
}
