//! Cross-cutting engine invariants.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::helpers::{external_ids, insert_entity, new_engine};
use crate::engine::FetchOptions;
use crate::types::{EntityId, Filter, Op, OrderKey, Query, Value};

#[tokio::test]
async fn test_filters_only_narrow_results() {
    let (engine, store) = new_engine();
    for (id, rank) in [("1", 10.0), ("2", 20.0), ("3", 30.0), ("4", 40.0)] {
        insert_entity(&store, "posts", id, &[("rank", Value::Number(rank))], 1, "a");
    }

    let unfiltered = engine
        .fetch(&Query::new("posts"), &FetchOptions::default())
        .await
        .expect("fetch");
    let filtered = engine
        .fetch(
            &Query::new("posts").filter(Filter::stmt("rank", Op::Gt, Value::Number(25.0))),
            &FetchOptions::default(),
        )
        .await
        .expect("fetch");

    for id in filtered.results.keys() {
        assert!(
            unfiltered.results.contains_key(id),
            "filtering must never add entities"
        );
    }
    assert_eq!(external_ids(&filtered), ["3", "4"]);
}

#[tokio::test]
async fn test_sort_is_deterministic_across_insertion_orders() {
    let mut entries: Vec<(String, f64)> = (0..20)
        .map(|i| (format!("{i:02}"), f64::from(i % 5)))
        .collect();

    let mut previous: Option<Vec<String>> = None;
    for seed in 0..3u64 {
        let (engine, store) = new_engine();
        let mut rng = StdRng::seed_from_u64(seed);
        entries.shuffle(&mut rng);
        for (tick, (id, rank)) in entries.iter().enumerate() {
            insert_entity(
                &store,
                "posts",
                id,
                &[("rank", Value::Number(*rank))],
                tick as u64 + 1,
                "a",
            );
        }

        let query = Query::new("posts").order_by(OrderKey::asc("rank"));
        let mut options = FetchOptions::default();
        options.skip_index = true;
        let result = engine.fetch(&query, &options).await.expect("fetch");
        let ids = external_ids(&result);

        // Ties on rank refine by entity id.
        for pair in result.results.keys().collect::<Vec<_>>().windows(2) {
            let a = &result.results[pair[0]];
            let b = &result.results[pair[1]];
            let rank = |view: &crate::types::EntityView| {
                view.value_at(&crate::types::AttributePath::single("rank"))
                    .cloned()
            };
            if rank(a) == rank(b) {
                assert!(pair[0] < pair[1], "ties must break on entity id");
            }
        }

        if let Some(previous) = &previous {
            assert_eq!(previous, &ids, "same multiset must sort identically");
        }
        previous = Some(ids);
    }
}

#[tokio::test]
async fn test_cursor_pagination_round_trip() {
    let (engine, store) = new_engine();
    for (id, rank) in [
        ("1", 10.0),
        ("2", 20.0),
        ("3", 20.0),
        ("4", 30.0),
        ("5", 40.0),
        ("6", 50.0),
    ] {
        insert_entity(&store, "posts", id, &[("rank", Value::Number(rank))], 1, "a");
    }

    // Exercise the buffered sort + stateful predicate path.
    let mut options = FetchOptions::default();
    options.skip_index = true;

    let base = Query::new("posts").order_by(OrderKey::asc("rank"));
    let whole = engine
        .fetch(&base.clone().limit(5), &options)
        .await
        .expect("fetch");

    let first = engine
        .fetch(&base.clone().limit(2), &options)
        .await
        .expect("fetch");
    let (last_id, last_view) = first.results.last().expect("two results");
    let cursor_value = last_view
        .value_at(&crate::types::AttributePath::single("rank"))
        .cloned()
        .expect("rank present");

    let second = engine
        .fetch(
            &base.clone().limit(3).after(cursor_value, last_id.clone(), false),
            &options,
        )
        .await
        .expect("fetch");

    let mut combined = external_ids(&first);
    combined.extend(external_ids(&second));
    assert_eq!(combined, external_ids(&whole));
}

#[tokio::test]
async fn test_variable_scopes_resolve() {
    let (engine, store) = new_engine();
    insert_entity(&store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");
    insert_entity(&store, "users", "2", &[("name", Value::String("Bob".into()))], 2, "a");

    let engine = engine.with_global_var("admin_name", Value::String("Alice".into()));

    // Global scope.
    let by_global =
        Query::new("users").filter(Filter::stmt_var("name", Op::Eq, "$global.admin_name"));
    let result = engine
        .fetch(&by_global, &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(external_ids(&result), ["1"]);

    // Query scope.
    let by_query = Query::new("users")
        .filter(Filter::stmt_var("name", Op::Eq, "$query.who"))
        .var("who", Value::String("Bob".into()));
    let result = engine
        .fetch(&by_query, &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(external_ids(&result), ["2"]);

    // Unscoped fallback resolves through the flat merge.
    let unscoped = Query::new("users")
        .filter(Filter::stmt_var("name", Op::Eq, "$who"))
        .var("who", Value::String("Bob".into()));
    let result = engine
        .fetch(&unscoped, &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(external_ids(&result), ["2"]);
}

#[tokio::test]
async fn test_select_projects_triples() {
    let (engine, store) = new_engine();
    insert_entity(
        &store,
        "users",
        "1",
        &[
            ("name", Value::String("Alice".into())),
            ("age", Value::Number(30.0)),
        ],
        1,
        "a",
    );

    let query = Query::new("users").select(vec![crate::types::AttributePath::single("name")]);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    let triples = &result.triples[&EntityId::from("users#1")];
    assert!(triples
        .iter()
        .any(|t| t.attribute.to_string() == "name"));
    assert!(
        !triples.iter().any(|t| t.attribute.to_string() == "age"),
        "unselected leaves must project away"
    );
    assert!(
        triples
            .iter()
            .any(|t| t.attribute.to_string() == "_collection"),
        "the collection marker always survives projection"
    );
}
