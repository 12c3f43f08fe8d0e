//! Filter evaluation.
//!
//! Filters run cheapest-first: literals, then scalar equality, ranges,
//! membership and pattern ops, groups, and sub-queries last. Groups
//! short-circuit. Clauses the index selector marked fulfilled are skipped
//! by the caller for current-view fetches; a state-vector-bounded fetch
//! re-evaluates everything because index entries may sit beyond the
//! requested frontier.

use futures::future::BoxFuture;

use crate::error::EngineError;
use crate::schema::DataType;
use crate::store::TripleStore;
use crate::types::{
    like_matches, EntityView, Filter, Op, Operand, Query, Statement, Value,
};

use super::context::ExecutionContext;
use super::{Engine, FetchOptions};

/// Estimated evaluation cost class, cheapest first.
pub(crate) fn filter_cost(filter: &Filter) -> u8 {
    match filter {
        Filter::Literal(_) => 0,
        Filter::Statement(statement) => match statement.op {
            Op::Eq | Op::Neq => 1,
            Op::Lt | Op::Lte | Op::Gt | Op::Gte | Op::IsDefined => 2,
            Op::In | Op::Nin | Op::Has | Op::NotHas | Op::Like | Op::NotLike => 3,
        },
        Filter::And(_) | Filter::Or(_) => 4,
        Filter::Exists(_) | Filter::Relation(_) => 5,
    }
}

/// Indices of `filters`, stable-sorted by cost.
pub(crate) fn cost_order(filters: &[Filter]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..filters.len()).collect();
    order.sort_by_key(|index| filter_cost(&filters[*index]));
    order
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Evaluate a query's where clauses against one entity, skipping the
    /// index-fulfilled ones.
    pub(crate) async fn matches_filters(
        &self,
        query: &Query,
        entity: &EntityView,
        ctx: &mut ExecutionContext,
        options: &FetchOptions,
        skip: &[usize],
    ) -> Result<bool, EngineError> {
        for index in cost_order(&query.filters) {
            if skip.contains(&index) {
                continue;
            }
            if !self
                .eval_filter(&query.filters[index], query, entity, ctx, options)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate one filter node.
    pub(crate) fn eval_filter<'a>(
        &'a self,
        filter: &'a Filter,
        query: &'a Query,
        entity: &'a EntityView,
        ctx: &'a mut ExecutionContext,
        options: &'a FetchOptions,
    ) -> BoxFuture<'a, Result<bool, EngineError>> {
        Box::pin(async move {
            match filter {
                Filter::Literal(constant) => Ok(*constant),
                Filter::Statement(statement) => {
                    self.eval_statement(statement, query, entity, ctx, options).await
                }
                Filter::And(children) => {
                    for index in cost_order(children) {
                        if !self
                            .eval_filter(&children[index], query, entity, ctx, options)
                            .await?
                        {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Filter::Or(children) => {
                    for index in cost_order(children) {
                        if self
                            .eval_filter(&children[index], query, entity, ctx, options)
                            .await?
                        {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Filter::Exists(sub) => {
                    let result = self
                        .fetch_subquery(sub, &query.vars, entity, ctx, options, true)
                        .await?;
                    let matched = !result.results.is_empty();
                    if matched {
                        ctx.push_collected(result.triples.into_values().flatten());
                    }
                    Ok(matched)
                }
                Filter::Relation(name) => Err(EngineError::QueryNotPrepared(format!(
                    "relation filter '{name}' was not expanded"
                ))),
            }
        })
    }

    async fn eval_statement(
        &self,
        statement: &Statement,
        query: &Query,
        entity: &EntityView,
        ctx: &mut ExecutionContext,
        options: &FetchOptions,
    ) -> Result<bool, EngineError> {
        let operand = match &statement.operand {
            Operand::Value(value) => Some(value.clone()),
            Operand::Variable(name) => self.resolve_var(name, query, ctx, options).await?,
        };

        let schema = self.schema_for(options);
        let set_typed = match schema {
            Some(schema) => matches!(
                schema.attribute(&query.collection, &statement.path),
                Some(DataType::Set(_))
            ),
            // Schema-less: member leaves with no value at the path itself
            // read as a set.
            None => {
                entity.value_at(&statement.path).is_none()
                    && entity.children_of(&statement.path).next().is_some()
            }
        };

        eval_statement_value(statement, entity, operand.as_ref(), set_typed)
    }
}

/// Register semantics for one statement against a materialized entity.
///
/// A missing leaf fails every positive comparison; negated operators are
/// the exact negation of their positive form, so `!=` against missing is
/// true. `isDefined` is the explicit presence test.
pub(crate) fn eval_statement_value(
    statement: &Statement,
    entity: &EntityView,
    operand: Option<&Value>,
    set_typed: bool,
) -> Result<bool, EngineError> {
    if statement.path.is_empty() {
        return Err(EngineError::InvalidFilter(
            "statement with empty path".to_owned(),
        ));
    }

    // `id` lives in the entity id, not in a triple.
    let id_value;
    let leaf = match entity.value_at(&statement.path) {
        Some(value) => Some(value),
        None if statement.path.segments() == ["id"] => {
            id_value = Value::String(entity.id.external_id().to_owned());
            Some(&id_value)
        }
        None => None,
    };

    match statement.op {
        Op::IsDefined => {
            let want = !matches!(operand, Some(Value::Boolean(false)));
            Ok(entity.is_defined(&statement.path) == want)
        }
        Op::Eq => Ok(equality(statement, entity, leaf, operand, set_typed)),
        Op::Neq => Ok(!equality(statement, entity, leaf, operand, set_typed)),
        Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
            let (Some(leaf), Some(operand)) = (leaf, operand) else {
                return Ok(false);
            };
            let cmp = leaf.cmp_total(operand);
            Ok(match statement.op {
                Op::Lt => cmp.is_lt(),
                Op::Lte => cmp.is_le(),
                Op::Gt => cmp.is_gt(),
                _ => cmp.is_ge(),
            })
        }
        Op::In => Ok(in_list(statement, entity, leaf, operand, set_typed)?),
        Op::Nin => Ok(!in_list(statement, entity, leaf, operand, set_typed)?),
        Op::Has => Ok(membership(statement, entity, operand)),
        Op::NotHas => Ok(!membership(statement, entity, operand)),
        Op::Like | Op::NotLike => {
            let matched = match (leaf, operand) {
                (Some(Value::String(text)), Some(Value::String(pattern))) => {
                    like_matches(pattern, text)
                }
                _ => false,
            };
            Ok(if statement.op == Op::Like {
                matched
            } else {
                !matched
            })
        }
    }
}

fn equality(
    statement: &Statement,
    entity: &EntityView,
    leaf: Option<&Value>,
    operand: Option<&Value>,
    set_typed: bool,
) -> bool {
    if set_typed {
        return membership(statement, entity, operand);
    }
    match (leaf, operand) {
        (Some(leaf), Some(operand)) => leaf.eq_total(operand),
        _ => false,
    }
}

fn membership(statement: &Statement, entity: &EntityView, operand: Option<&Value>) -> bool {
    let Some(operand) = operand else {
        return false;
    };
    let member = operand.to_segment();
    entity
        .set_members(&statement.path)
        .iter()
        .any(|present| *present == member)
}

fn in_list(
    statement: &Statement,
    entity: &EntityView,
    leaf: Option<&Value>,
    operand: Option<&Value>,
    set_typed: bool,
) -> Result<bool, EngineError> {
    let items = match operand {
        Some(Value::Array(items)) => items,
        None => return Ok(false),
        Some(other) => {
            return Err(EngineError::InvalidFilter(format!(
                "'{}' requires a list operand, got {other:?}",
                if statement.op == Op::In { "in" } else { "nin" }
            )))
        }
    };
    if set_typed {
        let members = entity.set_members(&statement.path);
        return Ok(items
            .iter()
            .any(|item| members.iter().any(|m| *m == item.to_segment())));
    }
    let Some(leaf) = leaf else { return Ok(false) };
    Ok(items.iter().any(|item| leaf.eq_total(item)))
}
