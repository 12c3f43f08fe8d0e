//! Ordered scans, range filters and the after-cursor.

use super::helpers::{external_ids, insert_entity, new_engine};
use crate::engine::FetchOptions;
use crate::types::{EntityId, Filter, Op, OrderKey, Query, Value};

fn ranked_posts(store: &crate::store::InMemoryTripleStore) {
    for (id, rank) in [("1", 10.0), ("2", 20.0), ("3", 30.0), ("4", 40.0), ("5", 50.0)] {
        insert_entity(store, "posts", id, &[("rank", Value::Number(rank))], 1, "a");
    }
}

#[tokio::test]
async fn test_order_scan_with_cursor_and_limit() {
    let (engine, store) = new_engine();
    ranked_posts(&store);

    let query = Query::new("posts")
        .order_by(OrderKey::asc("rank"))
        .limit(2)
        .after(Value::Number(20.0), EntityId::from("posts#2"), false);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["3", "4"]);
}

#[tokio::test]
async fn test_descending_order() {
    let (engine, store) = new_engine();
    ranked_posts(&store);

    let query = Query::new("posts").order_by(OrderKey::desc("rank")).limit(3);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["5", "4", "3"]);
}

#[tokio::test]
async fn test_range_filter_pair_consumed() {
    let (engine, store) = new_engine();
    ranked_posts(&store);

    let query = Query::new("posts")
        .filter(Filter::stmt("rank", Op::Gt, Value::Number(10.0)))
        .filter(Filter::stmt("rank", Op::Lte, Value::Number(40.0)))
        .order_by(OrderKey::asc("rank"));
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["2", "3", "4"]);
}

#[tokio::test]
async fn test_inclusive_cursor_admits_cursor_entity() {
    let (engine, store) = new_engine();
    ranked_posts(&store);

    let query = Query::new("posts")
        .order_by(OrderKey::asc("rank"))
        .limit(2)
        .after(Value::Number(20.0), EntityId::from("posts#2"), true);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["2", "3"]);
}

#[tokio::test]
async fn test_cursor_applies_without_index_support() {
    // Force the collection path so the stateful one-pass predicate runs
    // instead of the index seek.
    let (engine, store) = new_engine();
    ranked_posts(&store);

    let query = Query::new("posts")
        .order_by(OrderKey::asc("rank"))
        .limit(2)
        .after(Value::Number(20.0), EntityId::from("posts#2"), false);
    let mut options = FetchOptions::default();
    options.skip_index = true;
    let result = engine.fetch(&query, &options).await.expect("fetch");

    assert_eq!(external_ids(&result), ["3", "4"]);
}
