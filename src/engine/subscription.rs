//! Live subscriptions.
//!
//! Each subscription runs on its own task: an initial fetch, then one
//! write batch at a time from the store's broadcast channel, in arrival
//! order. Simple queries (no sub-query filters, no includes, no
//! relation-crossing order keys) are maintained incrementally with a
//! back-fill when the limit window runs dry; anything else re-fetches in
//! full.
//!
//! Callback errors route to `on_error` and never tear the subscription
//! down. Unsubscribing aborts the task; a lagged receiver resynchronizes
//! with a full re-fetch.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use tokio::sync::broadcast::error::RecvError;

use crate::error::EngineError;
use crate::schema::{entity_to_json, Schema};
use crate::store::{TripleStore, WriteBatch};
use crate::types::{After, EntityId, EntityView, Query, Triple};

use super::context::ExecutionContext;
use super::sort::{after_admits, compare_entities, sort_entities, ResultEntity};
use super::{Engine, FetchOptions, FetchResult};

/// One emission: JS-converted results in order, plus the raw matched
/// triples.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub results: Vec<(EntityId, serde_json::Value)>,
    pub triples: HashMap<EntityId, Vec<Triple>>,
}

/// Boxed update callback.
pub type UpdateCallback = Box<dyn Fn(&SubscriptionUpdate) + Send + Sync>;
/// Boxed error callback.
pub type ErrorCallback = Box<dyn Fn(&EngineError) + Send + Sync>;

/// Handle to a live subscription. Dropping it (or calling `unsubscribe`)
/// detaches the write handler; an in-flight callback completes but its
/// output is discarded.
pub struct SubscriptionHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Subscribe to a query's JS-converted results.
    pub fn subscribe(
        &self,
        query: Query,
        options: FetchOptions,
        on_results: impl Fn(&[(EntityId, serde_json::Value)]) + Send + Sync + 'static,
        on_error: Option<ErrorCallback>,
    ) -> SubscriptionHandle {
        self.subscribe_with(
            query,
            options,
            Box::new(move |update| on_results(&update.results)),
            on_error,
        )
    }

    /// Subscribe to results and the raw matched triples together.
    pub fn subscribe_results_and_triples(
        &self,
        query: Query,
        options: FetchOptions,
        on_update: impl Fn(&SubscriptionUpdate) + Send + Sync + 'static,
        on_error: Option<ErrorCallback>,
    ) -> SubscriptionHandle {
        self.subscribe_with(query, options, Box::new(on_update), on_error)
    }

    /// Subscribe to the matched triples alone.
    pub fn subscribe_triples(
        &self,
        query: Query,
        options: FetchOptions,
        on_triples: impl Fn(&HashMap<EntityId, Vec<Triple>>) + Send + Sync + 'static,
        on_error: Option<ErrorCallback>,
    ) -> SubscriptionHandle {
        self.subscribe_with(
            query,
            options,
            Box::new(move |update| on_triples(&update.triples)),
            on_error,
        )
    }

    fn subscribe_with(
        &self,
        query: Query,
        options: FetchOptions,
        on_update: UpdateCallback,
        on_error: Option<ErrorCallback>,
    ) -> SubscriptionHandle {
        let engine = self.clone();
        let mut writes = self.store().watch_writes();

        let task = tokio::spawn(async move {
            let mut live = LiveQuery::new(engine, query, options, on_update, on_error);
            live.initialize().await;
            loop {
                match writes.recv().await {
                    Ok(batch) => live.on_write(&batch).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscription lagged; re-fetching");
                        live.refetch().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle { task }
    }
}

/// The maintained state of one subscription.
struct LiveQuery<S> {
    engine: Engine<S>,
    query: Query,
    options: FetchOptions,
    complex: bool,
    results: IndexMap<EntityId, EntityView>,
    triples: HashMap<EntityId, Vec<Triple>>,
    included: HashMap<EntityId, std::collections::BTreeMap<String, serde_json::Value>>,
    on_update: UpdateCallback,
    on_error: Option<ErrorCallback>,
}

impl<S: TripleStore + 'static> LiveQuery<S> {
    fn new(
        engine: Engine<S>,
        query: Query,
        options: FetchOptions,
        on_update: UpdateCallback,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Self {
            engine,
            query,
            options,
            complex: false,
            results: IndexMap::new(),
            triples: HashMap::new(),
            included: HashMap::new(),
            on_update,
            on_error,
        }
    }

    async fn initialize(&mut self) {
        if !self.query.is_prepared() {
            match self.engine.prepare(&self.query, &self.options) {
                Ok(prepared) => self.query = prepared,
                Err(error) => {
                    self.error(&error);
                    return;
                }
            }
        }
        self.complex = is_complex(&self.query, self.engine.schema_for(&self.options));
        self.refetch().await;
    }

    async fn refetch(&mut self) {
        match self.engine.fetch(&self.query, &self.options).await {
            Ok(fetched) => {
                self.adopt(fetched);
                self.emit();
            }
            Err(error) => self.error(&error),
        }
    }

    fn adopt(&mut self, fetched: FetchResult) {
        self.results = fetched.results;
        self.triples = fetched.triples;
        self.included = fetched.included;
    }

    async fn on_write(&mut self, batch: &WriteBatch) {
        if self.complex {
            if batch.triples().next().is_some() {
                self.refetch().await;
            }
            return;
        }
        match self.maintain(batch).await {
            Ok(true) => self.emit(),
            Ok(false) => {}
            Err(error) => self.error(&error),
        }
    }

    /// Incremental maintenance for simple queries.
    async fn maintain(&mut self, batch: &WriteBatch) -> Result<bool, EngineError> {
        let candidates: BTreeSet<EntityId> = batch
            .triples()
            .filter(|triple| triple.entity_id.collection() == self.query.collection)
            .map(|triple| triple.entity_id.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }

        // Removal evidence from the previous emission has been delivered.
        let results = &self.results;
        self.triples.retain(|id, _| results.contains_key(id));

        let mut changed = false;
        let mut removed = false;

        for id in candidates {
            let (view, captured) = self.engine.materialize(&id, None).await?;

            let mut ctx = ExecutionContext::new(
                self.options.session.clone(),
                self.engine.global_vars.clone(),
            );
            let matches = !view.is_empty()
                && !view.is_tombstoned()
                && self
                    .engine
                    .matches_filters(&self.query, &view, &mut ctx, &self.options, &[])
                    .await?
                && self.admits_cursor(&view, &id);

            if matches {
                if self.in_limit_window(&view, &id) {
                    self.results.insert(id.clone(), view);
                    self.triples.insert(id, captured);
                    changed = true;
                }
            } else if self.results.shift_remove(&id).is_some() {
                // Keep the captured triples (the retraction included) so
                // the subscriber sees why the entity left.
                self.triples.insert(id, captured);
                changed = true;
                removed = true;
            }
        }

        if !changed {
            return Ok(false);
        }

        self.resort();
        if removed {
            self.backfill().await?;
        }
        if let Some(limit) = self.query.limit {
            while self.results.len() > limit {
                if let Some((evicted, _)) = self.results.pop() {
                    self.triples.remove(&evicted);
                }
            }
        }
        Ok(true)
    }

    fn admits_cursor(&self, view: &EntityView, id: &EntityId) -> bool {
        let Some(after) = &self.query.after else {
            return true;
        };
        let value = self
            .query
            .order
            .first()
            .and_then(|key| view.value_at(&key.path));
        after_admits(after, &self.query.order, value, id)
    }

    /// Whether the entity can sit inside the current limit window:
    /// always when unlimited or under-full, otherwise only if it does not
    /// sort after the current last entry.
    fn in_limit_window(&self, view: &EntityView, id: &EntityId) -> bool {
        let Some(limit) = self.query.limit else {
            return true;
        };
        if self.results.contains_key(id) || self.results.len() < limit {
            return true;
        }
        match self.results.last() {
            Some((last_id, last_view)) => {
                compare_entities((view, id), (last_view, last_id), &self.query.order).is_le()
            }
            None => true,
        }
    }

    fn resort(&mut self) {
        let drained: Vec<(EntityId, EntityView)> = self.results.drain(..).collect();
        let mut entries: Vec<ResultEntity> = drained
            .into_iter()
            .map(|(id, view)| {
                let captured = self.triples.get(&id).cloned().unwrap_or_default();
                (id, view, captured)
            })
            .collect();
        sort_entities(&mut entries, &self.query.order);
        for (id, view, _) in entries {
            self.results.insert(id, view);
        }
    }

    /// Refill an under-full limit window with a cursor fetch past the last
    /// remaining entry.
    async fn backfill(&mut self) -> Result<(), EngineError> {
        let Some(limit) = self.query.limit else {
            return Ok(());
        };
        if self.results.len() >= limit {
            return Ok(());
        }

        let mut refill = self.query.clone();
        refill.limit = Some(limit - self.results.len());
        refill.after = match self.results.last() {
            Some((last_id, last_view)) => {
                let value = self
                    .query
                    .order
                    .first()
                    .and_then(|key| last_view.value_at(&key.path))
                    .cloned()
                    .unwrap_or(crate::types::Value::Null);
                Some(After {
                    value,
                    entity_id: last_id.clone(),
                    inclusive: false,
                })
            }
            None => None,
        };

        let fetched = self.engine.fetch(&refill, &self.options).await?;
        for (id, view) in fetched.results {
            self.results.entry(id).or_insert(view);
        }
        for (id, captured) in fetched.triples {
            self.triples.entry(id).or_insert(captured);
        }
        Ok(())
    }

    fn emit(&self) {
        let schema = self.engine.schema_for(&self.options);
        let select = self.query.select.as_deref();
        let results = self
            .results
            .iter()
            .map(|(id, view)| (id.clone(), self.converted(id, view, schema, select)))
            .collect();
        let update = SubscriptionUpdate {
            results,
            triples: self.triples.clone(),
        };
        (self.on_update)(&update);
    }

    fn converted(
        &self,
        id: &EntityId,
        view: &EntityView,
        schema: Option<&Schema>,
        select: Option<&[crate::types::AttributePath]>,
    ) -> serde_json::Value {
        let mut json = entity_to_json(view, schema, select);
        if let (Some(aliases), serde_json::Value::Object(object)) =
            (self.included.get(id), &mut json)
        {
            for (alias, related) in aliases {
                object.insert(alias.as_str().to_owned(), related.clone());
            }
        }
        json
    }

    fn error(&self, error: &EngineError) {
        match &self.on_error {
            Some(callback) => callback(error),
            None => tracing::warn!(%error, "subscription error"),
        }
    }
}

/// A query is complex when incremental maintenance cannot track it: any
/// sub-query filter, any include, or an order key whose first segment is a
/// declared relation.
fn is_complex(query: &Query, schema: Option<&Schema>) -> bool {
    if query.has_subquery_filter() || !query.include.is_empty() {
        return true;
    }
    query.order.iter().any(|key| {
        key.path.first().is_some_and(|first| {
            schema.is_some_and(|s| s.relation(&query.collection, first).is_some())
        })
    })
}
