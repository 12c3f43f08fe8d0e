//! ripple — the live collection-query engine of a syncable triple-store
//! database.
//!
//! Life of a query:
//! 1. `prepare_query` canonicalizes includes, expands relation sugar and
//!    injects collection read rules
//! 2. The index selector picks one access path and notes which clauses it
//!    fulfills
//! 3. Candidates stream out of the index, get re-materialized into
//!    timestamped entity views, and run through the cost-ordered filters
//!    (sub-queries re-enter the engine under a pushed ancestor frame)
//! 4. Sort, after-cursor and limit shape the final window; includes and
//!    selection project it
//!
//! Writes flow the other way: the store broadcasts each transaction's
//! batch, subscriptions maintain their windows incrementally (or re-fetch
//! when the query is complex), and the delta engine synthesizes the
//! minimal triple set a remote subscriber needs, trying every root
//! permutation of the query tree so a change on either side of a relation
//! is caught.
//!
//! The engine owns no state: the triple store, schema service and optional
//! sub-query cache are all consumed through traits.

pub mod cache;
pub mod engine;
pub mod error;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(test)]
mod e2e_tests;

pub use engine::{
    prepare_query, Engine, FetchOneResult, FetchOptions, FetchResult, SubscriptionHandle,
    SubscriptionUpdate,
};
pub use error::{EngineError, StoreError};
pub use store::{InMemoryTripleStore, TripleStore, WriteBatch};
