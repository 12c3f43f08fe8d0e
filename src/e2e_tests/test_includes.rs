//! Includes, relation-crossing variables and rule injection.

use std::collections::BTreeMap;

use super::helpers::{external_ids, insert_entity, new_engine};
use crate::engine::FetchOptions;
use crate::error::EngineError;
use crate::schema::{CollectionSchema, DataType, RelationDef, Rules, Schema, Session};
use crate::types::{Cardinality, EntityId, Filter, Include, Op, Query, Value};

fn blog_schema() -> Schema {
    let mut users = CollectionSchema::default();
    users
        .attributes
        .insert("name".to_owned(), DataType::String);
    users.relations.insert(
        "posts".to_owned(),
        RelationDef {
            cardinality: Cardinality::Many,
            query: Query::new("posts").filter(Filter::stmt_var("author_id", Op::Eq, "$1.id")),
        },
    );
    users.relations.insert(
        "newest_post".to_owned(),
        RelationDef {
            cardinality: Cardinality::One,
            query: Query::new("posts").filter(Filter::stmt_var("author_id", Op::Eq, "$1.id")),
        },
    );

    let mut posts = CollectionSchema::default();
    posts
        .attributes
        .insert("author_id".to_owned(), DataType::String);
    posts
        .attributes
        .insert("topic".to_owned(), DataType::String);
    posts.relations.insert(
        "author".to_owned(),
        RelationDef {
            cardinality: Cardinality::One,
            query: Query::new("users").filter(Filter::stmt_var("id", Op::Eq, "$1.author_id")),
        },
    );

    Schema {
        collections: BTreeMap::from([("users".to_owned(), users), ("posts".to_owned(), posts)]),
    }
}

fn seed(store: &crate::store::InMemoryTripleStore) {
    insert_entity(store, "users", "1", &[("name", Value::String("Alice".into()))], 1, "a");
    insert_entity(store, "users", "2", &[("name", Value::String("Bob".into()))], 2, "a");
    for (id, author, topic) in [("p1", "1", "rust"), ("p2", "1", "dbs"), ("p3", "2", "rust")] {
        insert_entity(
            store,
            "posts",
            id,
            &[
                ("author_id", Value::String(author.into())),
                ("topic", Value::String(topic.into())),
            ],
            3,
            "a",
        );
    }
}

#[tokio::test]
async fn test_include_many_grafts_array() {
    let (engine, store) = new_engine();
    seed(&store);
    let engine = engine.with_schema(blog_schema());

    let query = Query::new("users").include("posts", Include::Default);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    let included = &result.included[&EntityId::from("users#1")]["posts"];
    let posts = included.as_array().expect("array for cardinality many");
    assert_eq!(posts.len(), 2);
    let included = &result.included[&EntityId::from("users#2")]["posts"];
    assert_eq!(included.as_array().expect("array").len(), 1);

    // Related triples join the result-triple set.
    assert!(result.triples.contains_key(&EntityId::from("posts#p1")));
}

#[tokio::test]
async fn test_include_one_grafts_object() {
    let (engine, store) = new_engine();
    seed(&store);
    let engine = engine.with_schema(blog_schema());

    let query = Query::new("posts")
        .filter(Filter::stmt("id", Op::Eq, Value::String("p3".into())))
        .include("author", Include::Default);
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    let author = &result.included[&EntityId::from("posts#p3")]["author"];
    assert_eq!(author["name"], "Bob");
}

#[tokio::test]
async fn test_unknown_include_alias_fails() {
    let (engine, store) = new_engine();
    seed(&store);
    let engine = engine.with_schema(blog_schema());

    let query = Query::new("users").include("comments", Include::Default);
    let error = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect_err("unknown relation");
    assert!(matches!(error, EngineError::UnknownRelation(_)));
}

#[tokio::test]
async fn test_variable_through_relation_loads_lazily() {
    let (engine, store) = new_engine();
    seed(&store);
    let engine = engine.with_schema(blog_schema());

    // Users whose newest post (a cardinality-one relation) exists with
    // the same author id; resolving `$1.newest_post.author_id` forces a
    // lazy relation load on the user frame.
    let query = Query::new("users").filter(Filter::exists(Query::new("posts").filter(
        Filter::stmt_var("author_id", Op::Eq, "$1.newest_post.author_id"),
    )));
    let result = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect("fetch");

    assert_eq!(external_ids(&result), ["1", "2"]);
}

#[tokio::test]
async fn test_variable_through_many_relation_fails() {
    let (engine, store) = new_engine();
    seed(&store);
    let engine = engine.with_schema(blog_schema());

    let query = Query::new("users").filter(Filter::exists(
        Query::new("posts").filter(Filter::stmt_var("author_id", Op::Eq, "$1.posts.author_id")),
    ));
    let error = engine
        .fetch(&query, &FetchOptions::default())
        .await
        .expect_err("many relation in variable path");
    assert!(matches!(
        error,
        EngineError::VariableRelationCardinality(_)
    ));
}

#[tokio::test]
async fn test_read_rules_injected() {
    let (engine, store) = new_engine();
    seed(&store);

    let mut schema = blog_schema();
    if let Some(posts) = schema.collections.get_mut("posts") {
        posts.rules = Some(Rules {
            read: vec![Filter::stmt_var("author_id", Op::Eq, "$session.user_id")],
        });
    }
    let engine = engine.with_schema(schema);

    let mut options = FetchOptions::default();
    options.session = Some(Session {
        vars: BTreeMap::from([("user_id".to_owned(), Value::String("1".into()))]),
        roles: Vec::new(),
    });

    let query = Query::new("posts");
    let result = engine.fetch(&query, &options).await.expect("fetch");
    assert_eq!(external_ids(&result), ["p1", "p2"]);

    options.skip_rules = true;
    let unrestricted = engine.fetch(&query, &options).await.expect("fetch");
    assert_eq!(unrestricted.results.len(), 3);
}
