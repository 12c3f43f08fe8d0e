//! Index selection.
//!
//! One access path is chosen per query; clause intersection is deliberately
//! left to the filter evaluator, trading occasional over-scan for planner
//! simplicity. The selector records which where clauses (and whether the
//! order / after requirements) the chosen path already satisfies, so the
//! downstream stages can skip them.
//!
//! Precedence, first rule that fires wins: id point, equality scan, range
//! scan, order scan, full collection scan.

use crate::error::EngineError;
use crate::schema::DataType;
use crate::store::{RangeRequest, TripleStore};
use crate::types::{Direction, EntityId, Op, Query, Statement, Value, COLLECTION_ATTRIBUTE};

use super::context::ExecutionContext;
use super::vars::Resolution;
use super::{Engine, FetchOptions};

/// The chosen access path.
#[derive(Debug, Clone)]
pub enum AccessPath {
    /// Direct id lookup.
    IdPoint { entity_id: EntityId },
    /// AVE exact scan. For sets the member rides in the key and `value`
    /// is the presence marker.
    EqualityScan {
        key: Vec<String>,
        value: Option<Value>,
    },
    /// Bounded attribute scan.
    RangeScan {
        key: Vec<String>,
        range: RangeRequest,
    },
    /// Ordered walk of an attribute index.
    OrderScan {
        key: Vec<String>,
        range: RangeRequest,
    },
    /// `_collection` index walk.
    CollectionScan,
}

/// Which query requirements the access path already satisfies.
#[derive(Debug, Clone, Default)]
pub struct Fulfilled {
    /// Indices into `query.filters`.
    pub clauses: Vec<usize>,
    pub order: bool,
    pub after: bool,
}

/// Selector output: path plus fulfillment bookkeeping.
#[derive(Debug, Clone)]
pub struct IndexSelection {
    pub path: AccessPath,
    pub fulfilled: Fulfilled,
}

impl IndexSelection {
    fn full_scan() -> Self {
        Self {
            path: AccessPath::CollectionScan,
            fulfilled: Fulfilled::default(),
        }
    }
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Choose the access path for a query.
    pub(crate) fn select_index(
        &self,
        query: &Query,
        options: &FetchOptions,
        ctx: &ExecutionContext,
    ) -> Result<IndexSelection, EngineError> {
        // Value indexes describe the current frontier; a fetch bounded to
        // an earlier one cannot trust them for candidate completeness.
        if options.skip_index || options.state_vector.is_some() {
            return Ok(IndexSelection::full_scan());
        }

        let selection = self.choose_path(query, options, ctx)?;
        tracing::debug!(
            collection = %query.collection,
            path = ?selection.path,
            fulfilled = ?selection.fulfilled.clauses,
            "access path selected"
        );
        Ok(selection)
    }

    fn choose_path(
        &self,
        query: &Query,
        options: &FetchOptions,
        ctx: &ExecutionContext,
    ) -> Result<IndexSelection, EngineError> {
        let schema = self.schema_for(options);

        // 1. Id point: any equality on `id`.
        for (index, statement) in query.statements() {
            if statement.op == Op::Eq && statement.path.segments() == ["id"] {
                if let Some(value) = self.operand_ready(statement, query, ctx)? {
                    return Ok(IndexSelection {
                        path: AccessPath::IdPoint {
                            entity_id: EntityId::new(&query.collection, &value.to_segment()),
                        },
                        fulfilled: Fulfilled {
                            clauses: vec![index],
                            ..Fulfilled::default()
                        },
                    });
                }
            }
        }

        // 2. Equality scan: first `=` statement over a scalar or set.
        for (index, statement) in query.statements() {
            if statement.op != Op::Eq {
                continue;
            }
            let data_type = schema.and_then(|s| s.attribute(&query.collection, &statement.path));
            if let Some(data_type) = data_type {
                if !data_type.is_scalar_or_set() {
                    continue;
                }
            } else if schema.is_some() {
                // Declared schema, undeclared path: not indexable.
                continue;
            }
            let Some(value) = self.operand_ready(statement, query, ctx)? else {
                continue;
            };
            let mut key = attr_key(&query.collection, statement);
            let scan_value = if matches!(data_type, Some(DataType::Set(_))) {
                // Member rides in the key; the indexed value is presence,
                // and a removed member's `false` entry must not match.
                key.push(value.to_segment());
                Some(Value::Boolean(true))
            } else {
                Some(value)
            };
            return Ok(IndexSelection {
                path: AccessPath::EqualityScan {
                    key,
                    value: scan_value,
                },
                fulfilled: Fulfilled {
                    clauses: vec![index],
                    ..Fulfilled::default()
                },
            });
        }

        // 3. Range scan: first range statement, consuming a complementary
        // bound on the same path when one follows.
        for (index, statement) in query.statements() {
            if !statement.op.is_range() {
                continue;
            }
            let Some(value) = self.operand_ready(statement, query, ctx)? else {
                continue;
            };
            let mut range = RangeRequest::default();
            set_bound(&mut range, statement.op, value);
            let mut clauses = vec![index];

            for (pair_index, pair) in query.statements() {
                if pair_index <= index || pair.path != statement.path {
                    continue;
                }
                if pair.op.is_range() && pair.op.is_lower_bound() != statement.op.is_lower_bound() {
                    if let Some(pair_value) = self.operand_ready(pair, query, ctx)? {
                        set_bound(&mut range, pair.op, pair_value);
                        clauses.push(pair_index);
                        break;
                    }
                }
            }

            return Ok(IndexSelection {
                path: AccessPath::RangeScan {
                    key: attr_key(&query.collection, statement),
                    range,
                },
                fulfilled: Fulfilled {
                    clauses,
                    ..Fulfilled::default()
                },
            });
        }

        // 4. Order scan: first order key, if it is a plain indexed
        // attribute. Only a single-key order is order-fulfilled, and only
        // then can the after-cursor translate to an index bound.
        if let Some(first) = query.order.first() {
            let order_path_usable = match schema {
                Some(schema) => schema
                    .attribute(&query.collection, &first.path)
                    .is_some_and(DataType::is_scalar_or_set),
                // Schema-less operation: a single segment cannot be a
                // relation hop.
                None => first.path.len() == 1,
            };
            if order_path_usable {
                let mut range = RangeRequest::directed(first.direction);
                let single_key = query.order.len() == 1;
                let mut after_fulfilled = false;
                if single_key {
                    if let Some(after) = &query.after {
                        let cursor = (after.value.clone(), after.entity_id.clone());
                        match (first.direction, after.inclusive) {
                            (Direction::Asc, false) => range.gt_cursor = Some(cursor),
                            (Direction::Asc, true) => range.gte_cursor = Some(cursor),
                            (Direction::Desc, false) => range.lt_cursor = Some(cursor),
                            (Direction::Desc, true) => range.lte_cursor = Some(cursor),
                        }
                        after_fulfilled = true;
                    }
                }
                let mut key = vec![query.collection.as_str().to_owned()];
                key.extend(first.path.segments().iter().cloned());
                return Ok(IndexSelection {
                    path: AccessPath::OrderScan { key, range },
                    fulfilled: Fulfilled {
                        clauses: Vec::new(),
                        order: single_key,
                        after: after_fulfilled,
                    },
                });
            }
        }

        // 5. Full collection scan.
        Ok(IndexSelection::full_scan())
    }

    /// Resolve a statement operand without store access; `None` when the
    /// operand is a variable that is not synchronously resolvable.
    fn operand_ready(
        &self,
        statement: &Statement,
        query: &Query,
        ctx: &ExecutionContext,
    ) -> Result<Option<Value>, EngineError> {
        match &statement.operand {
            crate::types::Operand::Value(value) => Ok(Some(value.clone())),
            crate::types::Operand::Variable(name) => {
                match self.resolve_var_ready(name, query, ctx)? {
                    Resolution::Ready(value) => Ok(value),
                    Resolution::NeedsRelation { .. } => Ok(None),
                }
            }
        }
    }
}

fn attr_key(collection: &str, statement: &Statement) -> Vec<String> {
    let mut key = Vec::with_capacity(statement.path.len() + 1);
    key.push(collection.to_owned());
    key.extend(statement.path.segments().iter().cloned());
    key
}

fn set_bound(range: &mut RangeRequest, op: Op, value: Value) {
    match op {
        Op::Gt => range.gt = Some(value),
        Op::Gte => range.gte = Some(value),
        Op::Lt => range.lt = Some(value),
        Op::Lte => range.lte = Some(value),
        _ => {}
    }
}

/// The AVE key for a full collection scan.
pub(crate) fn collection_scan_key(collection: &str) -> (Vec<String>, Value) {
    (
        vec![collection.to_owned(), COLLECTION_ATTRIBUTE.to_owned()],
        Value::String(collection.to_owned()),
    )
}
