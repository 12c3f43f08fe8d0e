//! Delta-triple synthesis for sync subscribers.

use std::collections::HashSet;
use std::sync::Arc;

use super::helpers::{entity_triples, external_ids, insert_entity, new_engine, tombstone_triple};
use crate::engine::{Engine, FetchOptions};
use crate::store::InMemoryTripleStore;
use crate::types::{EntityId, Filter, Op, Query, Value};

fn users_with_posts() -> Query {
    Query::new("users").filter(Filter::exists(
        Query::new("posts").filter(Filter::stmt_var("author_id", Op::Eq, "$1.id")),
    ))
}

#[tokio::test]
async fn test_insert_pulls_newly_matching_root_entity() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");
    insert_entity(&store, "users", "2", &[("name", Value::String("Bob".into()))], 2, "a");
    insert_entity(
        &store,
        "posts",
        "p1",
        &[("author_id", Value::String("1".into()))],
        3,
        "a",
    );

    // A post by user 2 lands: user 2 enters the result, so the delta must
    // carry every users#2 triple plus the new post triples.
    let new_post = entity_triples(
        "posts",
        "p2",
        &[("author_id", Value::String("2".into()))],
        10,
        "b",
    );
    store.insert_triples(new_post.clone());

    let delta = engine
        .fetch_delta_triples(&users_with_posts(), &new_post, &FetchOptions::default())
        .await
        .expect("delta");

    let by_entity: HashSet<(&str, String)> = delta
        .iter()
        .map(|t| (t.entity_id.0.as_str(), t.attribute.to_string()))
        .collect();

    assert!(by_entity.contains(&("users#2", "_collection".to_owned())));
    assert!(by_entity.contains(&("users#2", "name".to_owned())));
    assert!(by_entity.contains(&("posts#p2", "author_id".to_owned())));
    assert!(by_entity.contains(&("posts#p2", "_collection".to_owned())));
    // User 1 did not change membership; nothing of it ships.
    assert!(!by_entity.iter().any(|(id, _)| *id == "users#1"));
}

#[tokio::test]
async fn test_same_author_write_ships_post_and_its_justification() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");
    insert_entity(&store, "users", "2", &[("name", Value::String("Bob".into()))], 2, "a");
    insert_entity(
        &store,
        "posts",
        "p1",
        &[("author_id", Value::String("1".into()))],
        3,
        "a",
    );

    // A second post by the same author: user 1's membership is unchanged,
    // but the post enters the post-rooted permutation, so the new post
    // ships together with the author triples that justify it. Nothing of
    // the uninvolved user 2 ships.
    let new_post = entity_triples(
        "posts",
        "p2",
        &[("author_id", Value::String("1".into()))],
        10,
        "b",
    );
    store.insert_triples(new_post.clone());

    let delta = engine
        .fetch_delta_triples(&users_with_posts(), &new_post, &FetchOptions::default())
        .await
        .expect("delta");

    let ids: HashSet<&str> = delta.iter().map(|t| t.entity_id.0.as_str()).collect();
    assert_eq!(ids, HashSet::from(["posts#p2", "users#1"]));
}

#[tokio::test]
async fn test_tombstone_delta_carries_retraction() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");

    let tombstone = tombstone_triple("users", "1", 5, "a");
    store.insert_triples(vec![tombstone.clone()]);

    let query = Query::new("users").filter(Filter::stmt("id", Op::Eq, Value::String("1".into())));
    let delta = engine
        .fetch_delta_triples(&query, &[tombstone.clone()], &FetchOptions::default())
        .await
        .expect("delta");

    assert!(delta.iter().any(|t| {
        t.entity_id == EntityId::from("users#1")
            && t.attribute.to_string() == "_collection"
            && t.value == Value::Null
    }));
}

#[tokio::test]
async fn test_applying_delta_reconciles_local_result() {
    // A subscriber that holds the initial result triples and applies the
    // delta must re-derive the server's post-write result.
    let (server, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");
    insert_entity(&store, "users", "2", &[("name", Value::String("Bob".into()))], 2, "a");
    insert_entity(
        &store,
        "posts",
        "p1",
        &[("author_id", Value::String("1".into()))],
        3,
        "a",
    );

    let query = users_with_posts();
    let initial = server
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    let local_store = Arc::new(InMemoryTripleStore::new());
    for triples in initial.triples.values() {
        local_store.insert_triples(triples.clone());
    }

    let new_post = entity_triples(
        "posts",
        "p2",
        &[("author_id", Value::String("2".into()))],
        10,
        "b",
    );
    store.insert_triples(new_post.clone());
    let delta = server
        .fetch_delta_triples(&query, &new_post, &FetchOptions::default())
        .await
        .expect("delta");
    local_store.insert_triples(delta);

    let local = Engine::new(Arc::clone(&local_store))
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");
    let server_now = server
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&local), external_ids(&server_now));
    assert_eq!(external_ids(&local), ["1", "2"]);
}

#[tokio::test]
async fn test_delta_is_deduplicated() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "2", &[("name", Value::String("Bob".into()))], 1, "a");

    let new_post = entity_triples(
        "posts",
        "p1",
        &[("author_id", Value::String("2".into()))],
        10,
        "b",
    );
    store.insert_triples(new_post.clone());

    let delta = engine
        .fetch_delta_triples(&users_with_posts(), &new_post, &FetchOptions::default())
        .await
        .expect("delta");

    let mut keys: Vec<String> = delta
        .iter()
        .map(|t| format!("{}|{}|{}", t.entity_id, t.attribute, t.timestamp))
        .collect();
    let before = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(before, keys.len(), "delta must not repeat triples");
}
