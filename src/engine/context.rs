//! Execution context: the ancestor frame stack.
//!
//! One context is created per outer `fetch` and shared by reference down
//! the recursive sub-query tree. Every sub-query pushes a frame for its
//! parent entity and pops it on exit — on every exit path, so stack depth
//! on return always equals depth on entry.

use std::collections::BTreeMap;

use crate::schema::Session;
use crate::types::{EntityId, EntityView, Triple, Value, COLLECTION_ATTRIBUTE};

/// One ancestor entry: a parent entity's scalar attributes, plus any
/// cardinality-one relations loaded lazily for variable resolution.
#[derive(Debug, Clone)]
pub struct Frame {
    pub collection: String,
    pub entity_id: EntityId,
    /// Scalar leaves of the parent entity. Absent attributes stay absent
    /// (undefined); `_collection` is always present.
    pub values: BTreeMap<String, Value>,
    /// Lazily loaded relations; `None` records a load that found nothing.
    pub loaded: BTreeMap<String, Option<EntityView>>,
}

impl Frame {
    /// Build a frame from a materialized parent entity.
    #[must_use]
    pub fn for_entity(view: &EntityView) -> Self {
        let mut values = view.scalar_frame();
        values.insert(
            COLLECTION_ATTRIBUTE.to_owned(),
            Value::String(view.collection().to_owned()),
        );
        Self {
            collection: view.collection().to_owned(),
            entity_id: view.id.clone(),
            values,
            loaded: BTreeMap::new(),
        }
    }
}

/// The per-fetch execution context.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    stack: Vec<Frame>,
    /// Triples that sub-query evaluation consumed while filtering the
    /// current candidate; drained per entity so the result-triple set can
    /// justify every match to a subscriber.
    collected: Vec<Triple>,
    pub session: Option<Session>,
    pub global_vars: BTreeMap<String, Value>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(session: Option<Session>, global_vars: BTreeMap<String, Value>) -> Self {
        Self {
            stack: Vec::new(),
            collected: Vec::new(),
            session,
            global_vars,
        }
    }

    #[must_use]
    pub(crate) fn collected_mark(&self) -> usize {
        self.collected.len()
    }

    pub(crate) fn push_collected(&mut self, triples: impl IntoIterator<Item = Triple>) {
        self.collected.extend(triples);
    }

    /// Take everything collected since `mark`.
    pub(crate) fn drain_collected(&mut self, mark: usize) -> Vec<Triple> {
        self.collected.split_off(mark)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    /// The Nth ancestor, 1 = immediate parent.
    #[must_use]
    pub fn ancestor(&self, n: usize) -> Option<&Frame> {
        if n == 0 {
            return None;
        }
        self.stack.len().checked_sub(n).map(|i| &self.stack[i])
    }

    #[must_use]
    pub fn ancestor_mut(&mut self, n: usize) -> Option<&mut Frame> {
        if n == 0 {
            return None;
        }
        let index = self.stack.len().checked_sub(n)?;
        self.stack.get_mut(index)
    }

    /// Flat-merge lookup for unscoped variables, newest wins: frames from
    /// the top down, then the running query's vars, then role, session,
    /// global. Returns the value and how many scopes defined the name
    /// (for ambiguity logging).
    #[must_use]
    pub fn flat_lookup(
        &self,
        name: &str,
        query_vars: &BTreeMap<String, Value>,
    ) -> (Option<Value>, usize) {
        let mut hits = 0;
        let mut found: Option<Value> = None;

        for frame in self.stack.iter().rev() {
            if let Some(value) = frame.values.get(name) {
                hits += 1;
                if found.is_none() {
                    found = Some(value.clone());
                }
            }
        }
        if let Some(value) = query_vars.get(name) {
            hits += 1;
            if found.is_none() {
                found = Some(value.clone());
            }
        }
        if let Some(session) = &self.session {
            let role_vars = session.role_vars();
            if let Some(value) = role_vars.get(name) {
                hits += 1;
                if found.is_none() {
                    found = Some(value.clone());
                }
            }
            if let Some(value) = session.vars.get(name) {
                hits += 1;
                if found.is_none() {
                    found = Some(value.clone());
                }
            }
        }
        if let Some(value) = self.global_vars.get(name) {
            hits += 1;
            if found.is_none() {
                found = Some(value.clone());
            }
        }

        (found, hits)
    }
}
