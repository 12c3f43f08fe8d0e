//! Optional variable-aware query cache.
//!
//! The engine only consults a cache; building, invalidating and the
//! one-concurrent-build-per-fingerprint discipline belong to the
//! implementation behind this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::schema::Schema;
use crate::types::{EntityId, EntityView, Query, Triple, Value};

/// A cached query result: ordered entities plus their backing triples.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub results: IndexMap<EntityId, EntityView>,
    pub triples: HashMap<EntityId, Vec<Triple>>,
}

/// System-provided variable scopes visible to a cached resolution.
#[derive(Debug, Clone, Default)]
pub struct SystemVars {
    pub global: std::collections::BTreeMap<String, Value>,
    pub session: std::collections::BTreeMap<String, Value>,
    pub role: std::collections::BTreeMap<String, Value>,
}

/// A cache the engine may consult before executing a query.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Whether this cache will serve the query at all.
    fn can_cache_query(&self, query: &Query, schema: &Schema) -> bool;

    /// Resolve from cache; `None` means a miss and the engine executes
    /// normally.
    async fn resolve(&self, query: &Query, vars: &SystemVars) -> Option<CachedResult>;
}
