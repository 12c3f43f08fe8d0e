//! Delta-triple synthesis.
//!
//! Given a write batch and a query, computes the minimal triple set a
//! remote subscriber needs to reconcile its local result with the server's.
//! The changed entity may sit on any side of any relation in the query
//! tree, so the tree is re-rooted at every sub-query (edges reversed, the
//! linking operators inverted) and each permutation whose root collection
//! matches is evaluated on the entity's before and after views.
//!
//! The before view is the entity materialized at a derived causal
//! frontier: for every client that appears in the batch, one tick below
//! the batch's lowest tick from that client; clients outside the batch
//! stay unbounded.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::EngineError;
use crate::store::TripleStore;
use crate::types::{
    AttributePath, EntityId, EntityView, Filter, Operand, Query, StateVector, Statement,
    Timestamp, Triple,
};

use super::context::ExecutionContext;
use super::vars::{parse_var, VarScope};
use super::{Engine, FetchOptions};

/// All root permutations of a query tree, the original first.
///
/// Permuted queries carry filters and vars only; order, limit, cursor,
/// selection and includes do not affect membership and are dropped.
///
/// # Errors
///
/// `ReverseOperator` when a linking statement uses an operator with no
/// inverse.
pub fn root_permutations(query: &Query) -> Result<Vec<Query>, EngineError> {
    let mut out = Vec::new();
    collect_permutations(&evaluation_form(query), None, &mut out)?;
    Ok(out)
}

/// Walk the tree, re-rooting at each sub-query. `skip` marks the edge
/// that was just reversed so the walk never flips it back.
fn collect_permutations(
    query: &Query,
    skip: Option<usize>,
    out: &mut Vec<Query>,
) -> Result<(), EngineError> {
    out.push(query.clone());
    for (index, filter) in query.filters.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        if let Filter::Exists(sub) = filter {
            let rerooted = reroot(query, index, sub)?;
            let reversed_edge = rerooted.filters.len() - 1;
            collect_permutations(&rerooted, Some(reversed_edge), out)?;
        }
    }
    Ok(())
}

/// Make `child` (the sub-query at `edge_index`) the root: its `$1` link
/// statements move to the parent side with inverted operators, and the
/// parent (minus this edge) becomes an exists sub-query of the child.
fn reroot(parent: &Query, edge_index: usize, child: &Query) -> Result<Query, EngineError> {
    let mut links: Vec<(Statement, AttributePath)> = Vec::new();
    let mut rest: Vec<Filter> = Vec::new();
    for filter in &child.filters {
        if let Filter::Statement(statement) = filter {
            if let Operand::Variable(name) = &statement.operand {
                if let Ok(var) = parse_var(name) {
                    if var.scope == VarScope::Ancestor(1) {
                        links.push((statement.clone(), var.path));
                        continue;
                    }
                }
            }
        }
        rest.push(filter.clone());
    }

    let mut parent_filters: Vec<Filter> = parent
        .filters
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != edge_index)
        .map(|(_, filter)| filter.clone())
        .collect();
    for (link, parent_path) in &links {
        parent_filters.push(Filter::Statement(Statement {
            path: parent_path.clone(),
            op: link.op.reverse()?,
            operand: Operand::Variable(format!("$1.{}", link.path)),
        }));
    }

    let reversed_parent = evaluation_query(
        parent.collection.as_str().to_owned(),
        parent_filters,
        parent.vars.clone(),
    );
    let mut filters = rest;
    filters.push(Filter::Exists(Box::new(reversed_parent)));
    Ok(evaluation_query(
        child.collection.as_str().to_owned(),
        filters,
        child.vars.clone(),
    ))
}

/// Strip a query to its membership-relevant parts.
fn evaluation_form(query: &Query) -> Query {
    evaluation_query(
        query.collection.as_str().to_owned(),
        query.filters.as_slice().to_vec(),
        query.vars.clone(),
    )
}

fn evaluation_query(
    collection: String,
    filters: Vec<Filter>,
    vars: BTreeMap<String, crate::types::Value>,
) -> Query {
    let mut query = Query::new(collection);
    query.filters = filters;
    query.vars = vars;
    query.prepared = true;
    query
}

/// Whether a filter node involves a sub-query anywhere.
fn has_subquery(filter: &Filter) -> bool {
    match filter {
        Filter::Exists(_) | Filter::Relation(_) => true,
        Filter::And(children) | Filter::Or(children) => children.iter().any(has_subquery),
        Filter::Statement(_) | Filter::Literal(_) => false,
    }
}

type TripleKey = (EntityId, AttributePath, Timestamp);

fn triple_key(triple: &Triple) -> TripleKey {
    (
        triple.entity_id.clone(),
        triple.attribute.clone(),
        triple.timestamp.clone(),
    )
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Compute the delta triples a subscriber needs after a write batch.
    pub async fn fetch_delta_triples(
        &self,
        query: &Query,
        new_triples: &[Triple],
        options: &FetchOptions,
    ) -> Result<Vec<Triple>, EngineError> {
        if new_triples.is_empty() {
            return Ok(Vec::new());
        }

        let prepared;
        let query = if query.is_prepared() {
            query
        } else {
            prepared = self.prepare(query, options)?;
            &prepared
        };

        let mut changed: BTreeMap<EntityId, Vec<Triple>> = BTreeMap::new();
        let mut changed_keys: HashSet<TripleKey> = HashSet::new();
        for triple in new_triples {
            changed
                .entry(triple.entity_id.clone())
                .or_default()
                .push(triple.clone());
            changed_keys.insert(triple_key(triple));
        }

        // Ticks are 1-based; a client whose lowest batch tick is t sees
        // everything at or below t - 1 in the before view.
        let mut min_ticks: HashMap<&str, u64> = HashMap::new();
        for triple in new_triples {
            min_ticks
                .entry(triple.timestamp.client_id.as_str())
                .and_modify(|tick| *tick = (*tick).min(triple.timestamp.tick))
                .or_insert(triple.timestamp.tick);
        }
        let mut before = StateVector::new();
        for (client, tick) in min_ticks {
            before.set(client, tick.saturating_sub(1));
        }

        let permutations = root_permutations(query)?;
        let before_options = options.with_state_vector(Some(before.clone()));
        let after_options = options.with_state_vector(None);

        let mut out: Vec<Triple> = Vec::new();
        let mut emitted: HashSet<TripleKey> = HashSet::new();
        let mut push = |triple: Triple, out: &mut Vec<Triple>| {
            if emitted.insert(triple_key(&triple)) {
                out.push(triple);
            }
        };

        for (entity_id, entity_triples) in &changed {
            let (after_view, after_triples) = self.materialize(entity_id, None).await?;
            let (before_view, _) = self.materialize(entity_id, Some(&before)).await?;

            for permutation in permutations
                .iter()
                .filter(|p| p.collection == entity_id.collection())
            {
                let before_simple = alive(&before_view)
                    && self
                        .matches_simple(permutation, &before_view, &before_options)
                        .await?;
                let after_simple = alive(&after_view)
                    && self
                        .matches_simple(permutation, &after_view, &after_options)
                        .await?;
                if !before_simple && !after_simple {
                    continue;
                }

                let before_matched = before_simple
                    && self
                        .matches_subqueries(permutation, &before_view, &before_options)
                        .await?
                        .0;
                let (after_matched, subquery_triples) = if after_simple {
                    self.matches_subqueries(permutation, &after_view, &after_options)
                        .await?
                } else {
                    (false, Vec::new())
                };

                if !before_matched && after_matched {
                    // The entity entered the result: ship its full state,
                    // minus what the batch already carries.
                    for triple in &after_triples {
                        if !changed_keys.contains(&triple_key(triple)) {
                            push(triple.clone(), &mut out);
                        }
                    }
                    for triple in subquery_triples {
                        push(triple, &mut out);
                    }
                }
            }

            for triple in entity_triples {
                push(triple.clone(), &mut out);
            }
        }

        Ok(out)
    }

    /// Evaluate the non-sub-query filters of a permutation root.
    async fn matches_simple(
        &self,
        query: &Query,
        view: &EntityView,
        options: &FetchOptions,
    ) -> Result<bool, EngineError> {
        let mut ctx = ExecutionContext::new(options.session.clone(), self.global_vars.clone());
        for filter in query.filters.iter().filter(|f| !has_subquery(f)) {
            if !self.eval_filter(filter, query, view, &mut ctx, options).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate the sub-query filters, collecting the triples the matching
    /// sub-results used.
    async fn matches_subqueries(
        &self,
        query: &Query,
        view: &EntityView,
        options: &FetchOptions,
    ) -> Result<(bool, Vec<Triple>), EngineError> {
        let mut ctx = ExecutionContext::new(options.session.clone(), self.global_vars.clone());
        let mut collected = Vec::new();
        for filter in query.filters.iter().filter(|f| has_subquery(f)) {
            match filter {
                Filter::Exists(sub) => {
                    let result = self
                        .fetch_subquery(sub, &query.vars, view, &mut ctx, options, true)
                        .await?;
                    if result.results.is_empty() {
                        return Ok((false, collected));
                    }
                    collected.extend(result.triples.into_values().flatten());
                }
                other => {
                    if !self.eval_filter(other, query, view, &mut ctx, options).await? {
                        return Ok((false, collected));
                    }
                }
            }
        }
        Ok((true, collected))
    }
}

fn alive(view: &EntityView) -> bool {
    !view.is_empty() && !view.is_tombstoned()
}
