//! The collection query engine.
//!
//! `Engine` answers structured queries against a triple store and keeps
//! live subscriptions up to date as writes land. It owns no data: reads go
//! through the `TripleStore` trait, schema knowledge through the schema
//! service, and the optional sub-query cache through its trait.
//!
//! One `fetch` observes a consistent snapshot; the pipeline pulls
//! candidates lazily from the chosen index path, re-materializes each
//! entity, filters, sorts, applies the cursor and limit, then runs
//! includes and projection.

pub mod context;
pub mod delta;
pub mod prepare;
pub mod subscription;
pub mod vars;

mod candidates;
mod filter;
mod materialize;
mod select;
mod sort;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::cache::{QueryCache, SystemVars};
use crate::error::EngineError;
use crate::schema::{entity_to_json, Schema, Session};
use crate::store::TripleStore;
use crate::types::{
    Cardinality, EntityId, EntityView, Filter, Include, Query, StateVector, Triple, Value,
    COLLECTION_ATTRIBUTE,
};

use context::{ExecutionContext, Frame};
use sort::{sort_entities, AfterPredicate, ResultEntity};

pub use prepare::prepare_query;
pub use subscription::{SubscriptionHandle, SubscriptionUpdate};

/// Per-fetch options.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Overrides the engine's schema for this fetch.
    pub schema: Option<Arc<Schema>>,
    /// Session context for `$session` / `$role` variables.
    pub session: Option<Session>,
    /// Skip rule injection during preparation.
    pub skip_rules: bool,
    /// Optional variable-aware sub-query cache.
    pub cache: Option<Arc<dyn QueryCache>>,
    /// Bound materialization to a causal frontier.
    pub state_vector: Option<StateVector>,
    /// Force the full-collection access path.
    pub skip_index: bool,
}

impl FetchOptions {
    /// These options with a different causal bound.
    #[must_use]
    pub fn with_state_vector(&self, state_vector: Option<StateVector>) -> Self {
        let mut options = self.clone();
        options.state_vector = state_vector;
        options
    }
}

/// An ordered fetch result: entities in final sort order plus the triples
/// that back them (including tombstone triples of entities that dropped
/// out, so subscribers see retractions).
#[derive(Debug, Default)]
pub struct FetchResult {
    pub results: IndexMap<EntityId, EntityView>,
    pub triples: HashMap<EntityId, Vec<Triple>>,
    /// JS-converted related entities per result entity and include alias.
    pub included: HashMap<EntityId, BTreeMap<String, serde_json::Value>>,
}

/// Result of `fetch_one`.
#[derive(Debug, Default)]
pub struct FetchOneResult {
    pub result: Option<EntityView>,
    pub triples: HashMap<EntityId, Vec<Triple>>,
}

/// The query engine.
pub struct Engine<S> {
    store: Arc<S>,
    schema: Option<Arc<Schema>>,
    global_vars: BTreeMap<String, Value>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            schema: self.schema.clone(),
            global_vars: self.global_vars.clone(),
        }
    }
}

impl<S: TripleStore + 'static> Engine<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            schema: None,
            global_vars: BTreeMap::new(),
        }
    }

    /// Attach a schema the engine uses when options carry none.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Register a process-wide `$global` variable.
    #[must_use]
    pub fn with_global_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.global_vars.insert(name.into(), value);
        self
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn schema_for<'a>(&'a self, options: &'a FetchOptions) -> Option<&'a Schema> {
        options.schema.as_deref().or(self.schema.as_deref())
    }

    /// Prepare a query against the effective schema.
    pub fn prepare(&self, query: &Query, options: &FetchOptions) -> Result<Query, EngineError> {
        prepare_query(query, self.schema_for(options), options.skip_rules)
    }

    /// Execute a query and return its ordered results.
    pub async fn fetch(
        &self,
        query: &Query,
        options: &FetchOptions,
    ) -> Result<FetchResult, EngineError> {
        let prepared;
        let query = if query.is_prepared() {
            query
        } else {
            prepared = self.prepare(query, options)?;
            &prepared
        };

        let mut ctx = ExecutionContext::new(options.session.clone(), self.global_vars.clone());
        let result = self.fetch_with_context(query, options, &mut ctx).await;
        debug_assert_eq!(ctx.depth(), 0, "frame stack must drain");
        result
    }

    /// Execute with an implicit limit of one.
    pub async fn fetch_one(
        &self,
        query: &Query,
        options: &FetchOptions,
    ) -> Result<FetchOneResult, EngineError> {
        let mut limited = query.clone();
        limited.limit = Some(1);
        let fetched = self.fetch(&limited, options).await?;
        Ok(FetchOneResult {
            result: fetched.results.into_iter().map(|(_, view)| view).next(),
            triples: fetched.triples,
        })
    }

    /// The recursive fetch body. Sub-queries re-enter here with the shared
    /// execution context; the frame stack depth is identical on entry and
    /// on every exit.
    pub(crate) fn fetch_with_context<'a>(
        &'a self,
        query: &'a Query,
        options: &'a FetchOptions,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<FetchResult, EngineError>> {
        Box::pin(async move {
            validate_executable(query)?;
            let entry_depth = ctx.depth();

            if let Some(hit) = self.try_cache(query, options).await {
                return Ok(hit);
            }

            let selection = self.select_index(query, options, ctx)?;
            let mut candidates = self
                .open_candidates(
                    &query.collection,
                    &selection,
                    options.state_vector.is_some(),
                )
                .await?;

            // A state-vector-bounded fetch re-evaluates everything: index
            // entries may reflect triples beyond the requested frontier.
            let skip: Vec<usize> = if options.state_vector.is_some() {
                Vec::new()
            } else {
                selection.fulfilled.clauses.clone()
            };
            let stream_take = selection.fulfilled.order
                && (query.after.is_none() || selection.fulfilled.after);

            let mut survivors: Vec<ResultEntity> = Vec::new();
            let mut retraction_triples: HashMap<EntityId, Vec<Triple>> = HashMap::new();
            let mut subquery_triples: HashMap<EntityId, Vec<Triple>> = HashMap::new();

            while let Some(id) = candidates.next().await? {
                let (view, captured) =
                    self.materialize(&id, options.state_vector.as_ref()).await?;
                if view.is_empty() {
                    continue;
                }
                if view.is_tombstoned() {
                    // Captured before dropping, so the result-triple set
                    // carries the retraction to subscribers.
                    retraction_triples.insert(id, captured);
                    continue;
                }
                let mark = ctx.collected_mark();
                let passed = self
                    .matches_filters(query, &view, ctx, options, &skip)
                    .await?;
                let consumed = ctx.drain_collected(mark);
                if !passed {
                    continue;
                }
                if !consumed.is_empty() {
                    subquery_triples.insert(id.clone(), consumed);
                }
                survivors.push((id, view, captured));
                if stream_take {
                    if let Some(limit) = query.limit {
                        if survivors.len() >= limit {
                            break;
                        }
                    }
                }
            }

            if !selection.fulfilled.order {
                sort_entities(&mut survivors, &query.order);
            }

            if let Some(after) = &query.after {
                if !selection.fulfilled.after {
                    let first_path = query.order.first().map(|key| key.path.clone());
                    let mut predicate = AfterPredicate::new(after, &query.order);
                    survivors.retain(|(id, view, _)| {
                        let value = first_path.as_ref().and_then(|path| view.value_at(path));
                        predicate.admit(value, id)
                    });
                }
            }

            if let Some(limit) = query.limit {
                survivors.truncate(limit);
            }

            let (included, extra_triples) =
                self.run_includes(query, &survivors, ctx, options).await?;

            let mut results = IndexMap::with_capacity(survivors.len());
            let mut triples: HashMap<EntityId, Vec<Triple>> = HashMap::new();
            for (id, view, captured) in survivors {
                triples.insert(id.clone(), project_triples(captured, query));
                results.insert(id, view);
            }
            for (id, captured) in retraction_triples {
                triples.entry(id).or_default().extend(captured);
            }
            // Sub-query triples justify a match; ship them (under their
            // own entities) only for roots that made the final window.
            for (root, consumed) in subquery_triples {
                if !results.contains_key(&root) {
                    continue;
                }
                for triple in consumed {
                    triples
                        .entry(triple.entity_id.clone())
                        .or_default()
                        .push(triple);
                }
            }
            for (id, extra) in extra_triples {
                triples.entry(id).or_default().extend(extra);
            }

            debug_assert_eq!(ctx.depth(), entry_depth, "frame stack must balance");
            Ok(FetchResult {
                results,
                triples,
                included,
            })
        })
    }

    /// Run a sub-query under a frame for the parent entity. The pop runs
    /// on every exit path.
    pub(crate) fn fetch_subquery<'a>(
        &'a self,
        sub: &'a Query,
        parent_vars: &'a BTreeMap<String, Value>,
        parent: &'a EntityView,
        ctx: &'a mut ExecutionContext,
        options: &'a FetchOptions,
        limit_one: bool,
    ) -> BoxFuture<'a, Result<FetchResult, EngineError>> {
        Box::pin(async move {
            // Child vars win over inherited parent vars.
            let mut effective = sub.clone();
            for (name, value) in parent_vars {
                effective
                    .vars
                    .entry(name.as_str().to_owned())
                    .or_insert_with(|| value.clone());
            }
            if limit_one {
                effective.limit = Some(1);
            }

            ctx.push_frame(Frame::for_entity(parent));
            let result = self.fetch_with_context(&effective, options, ctx).await;
            ctx.pop_frame();
            result
        })
    }

    async fn try_cache(&self, query: &Query, options: &FetchOptions) -> Option<FetchResult> {
        let cache = options.cache.as_ref()?;
        let schema = self.schema_for(options)?;
        if !schema.can_cache_query(query) || !cache.can_cache_query(query, schema) {
            return None;
        }
        let session = options.session.as_ref();
        let vars = SystemVars {
            global: self.global_vars.clone(),
            session: session.map(|s| s.vars.clone()).unwrap_or_default(),
            role: session.map(Session::role_vars).unwrap_or_default(),
        };
        let hit = cache.resolve(query, &vars).await?;
        Some(FetchResult {
            results: hit.results,
            triples: hit.triples,
            included: HashMap::new(),
        })
    }

    async fn run_includes(
        &self,
        query: &Query,
        survivors: &[ResultEntity],
        ctx: &mut ExecutionContext,
        options: &FetchOptions,
    ) -> Result<IncludeOutput, EngineError> {
        let mut included: HashMap<EntityId, BTreeMap<String, serde_json::Value>> = HashMap::new();
        let mut extra_triples: HashMap<EntityId, Vec<Triple>> = HashMap::new();
        if query.include.is_empty() {
            return Ok((included, extra_triples));
        }

        for (id, view, _) in survivors {
            let mut per_entity = BTreeMap::new();
            for (alias, include) in &query.include {
                let Include::Subquery {
                    query: sub,
                    cardinality,
                } = include
                else {
                    return Err(EngineError::QueryNotPrepared(format!(
                        "include '{alias}' was not canonicalized"
                    )));
                };

                let sub_result = self
                    .fetch_subquery(
                        sub,
                        &query.vars,
                        view,
                        ctx,
                        options,
                        *cardinality == Cardinality::One,
                    )
                    .await?;

                let schema = self.schema_for(options);
                let select = sub.select.as_deref();
                let json = match cardinality {
                    Cardinality::One => sub_result
                        .results
                        .values()
                        .next()
                        .map_or(serde_json::Value::Null, |related| {
                            entity_to_json(related, schema, select)
                        }),
                    Cardinality::Many => serde_json::Value::Array(
                        sub_result
                            .results
                            .values()
                            .map(|related| entity_to_json(related, schema, select))
                            .collect(),
                    ),
                };
                per_entity.insert(alias.as_str().to_owned(), json);

                for (related_id, related_triples) in sub_result.triples {
                    extra_triples
                        .entry(related_id)
                        .or_default()
                        .extend(related_triples);
                }
            }
            included.insert(id.clone(), per_entity);
        }

        Ok((included, extra_triples))
    }
}

type IncludeOutput = (
    HashMap<EntityId, BTreeMap<String, serde_json::Value>>,
    HashMap<EntityId, Vec<Triple>>,
);

/// Reject queries whose includes or relation sugar were never
/// canonicalized.
fn validate_executable(query: &Query) -> Result<(), EngineError> {
    for (alias, include) in &query.include {
        match include {
            Include::Default => {
                return Err(EngineError::QueryNotPrepared(format!(
                    "include '{alias}' is shorthand; run prepare_query first"
                )))
            }
            Include::Subquery { query: sub, .. } => validate_executable(sub)?,
        }
    }
    fn walk(filters: &[Filter]) -> Result<(), EngineError> {
        for filter in filters {
            match filter {
                Filter::Relation(name) => {
                    return Err(EngineError::QueryNotPrepared(format!(
                        "relation filter '{name}' is shorthand; run prepare_query first"
                    )))
                }
                Filter::And(children) | Filter::Or(children) => walk(children)?,
                Filter::Exists(sub) => validate_executable(sub)?,
                Filter::Statement(_) | Filter::Literal(_) => {}
            }
        }
        Ok(())
    }
    walk(&query.filters)
}

/// Apply the `select` projection to an entity's captured triples. The
/// collection marker and order-key leaves always survive so cursors and
/// tombstones keep working downstream.
fn project_triples(captured: Vec<Triple>, query: &Query) -> Vec<Triple> {
    let Some(select) = &query.select else {
        return captured;
    };
    captured
        .into_iter()
        .filter(|triple| {
            triple.attribute.first() == Some(COLLECTION_ATTRIBUTE)
                || select.iter().any(|path| {
                    triple.attribute.starts_with(path) || path.starts_with(&triple.attribute)
                })
                || query
                    .order
                    .iter()
                    .any(|key| triple.attribute.starts_with(&key.path))
        })
        .collect()
}
