//! Id point lookups.

use super::helpers::{external_ids, new_engine};
use crate::engine::FetchOptions;
use crate::types::{AttributePath, EntityId, Filter, Op, Query, Timestamp, Triple, Value};

#[tokio::test]
async fn test_id_point_lookup() {
    let (engine, store) = new_engine();
    store.insert_triples(vec![Triple::new(
        EntityId::from("users#1"),
        AttributePath::single("name"),
        Value::String("Alice".into()),
        Timestamp::new(1, "a"),
    )]);

    let query = Query::new("users").filter(Filter::stmt("id", Op::Eq, Value::String("1".into())));
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["1"]);
    let entity = &result.results[&EntityId::from("users#1")];
    assert_eq!(
        entity.value_at(&AttributePath::single("name")),
        Some(&Value::String("Alice".into()))
    );
}

#[tokio::test]
async fn test_id_point_miss_is_empty() {
    let (engine, _store) = new_engine();
    let query = Query::new("users").filter(Filter::stmt("id", Op::Eq, Value::String("404".into())));
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn test_fulfilled_id_clause_not_reevaluated_against_leaf() {
    // The id clause is satisfied by construction of the entity id; there
    // is no `id` leaf in the triples and the filter must not require one.
    let (engine, store) = new_engine();
    store.insert_triples(vec![Triple::new(
        EntityId::from("users#7"),
        AttributePath::single("name"),
        Value::String("Nadia".into()),
        Timestamp::new(1, "a"),
    )]);

    let query = Query::new("users").filter(Filter::stmt("id", Op::Eq, Value::String("7".into())));
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(external_ids(&result), ["7"]);
}
