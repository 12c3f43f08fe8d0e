//! Core data model: values, timestamps, triples, entity views, queries.

pub mod entity;
pub mod query;
pub mod timestamp;
pub mod triple;
pub mod value;

pub use entity::{fold_triples, has_user_data, EntityView, Leaf};
pub use query::{
    After, Cardinality, Direction, Filter, Include, Op, Operand, OrderKey, Query, Statement,
};
pub use timestamp::{StateVector, Timestamp};
pub use triple::{AttributePath, EntityId, Triple, COLLECTION_ATTRIBUTE};
pub use value::{cmp_optional, encode_optional, like_matches, Value};
