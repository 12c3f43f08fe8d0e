//! The query value type.
//!
//! A query is an immutable description: collection, filters, order,
//! pagination cursor, selection, includes and query-scoped variables.
//! Rewriting (preparation, variable substitution, root permutation)
//! produces new values; a query is never mutated after construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

use super::triple::{AttributePath, EntityId};
use super::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl Direction {
    #[must_use]
    pub const fn is_ascending(self) -> bool {
        matches!(self, Self::Asc)
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    pub path: AttributePath,
    pub direction: Direction,
}

impl OrderKey {
    #[must_use]
    pub fn asc(path: impl Into<AttributePath>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Asc,
        }
    }

    #[must_use]
    pub fn desc(path: impl Into<AttributePath>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Desc,
        }
    }
}

/// Pagination cursor over the first order key.
///
/// With `inclusive = false`, the entity equal to the cursor in value and id
/// is excluded; everything strictly after is included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct After {
    pub value: Value,
    pub entity_id: EntityId,
    pub inclusive: bool,
}

/// Filter statement operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "nin")]
    Nin,
    #[serde(rename = "has")]
    Has,
    #[serde(rename = "!has")]
    NotHas,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "nlike")]
    NotLike,
    #[serde(rename = "isDefined")]
    IsDefined,
}

impl Op {
    /// Whether this is one of the four range comparisons.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    /// The complementary range direction, for matching range pairs.
    #[must_use]
    pub const fn is_lower_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Gte)
    }

    /// The inverse operator used when a relation edge is reversed during
    /// root permutation.
    ///
    /// # Errors
    ///
    /// Returns `ReverseOperator` for operators with no inverse.
    pub fn reverse(self) -> Result<Self, EngineError> {
        match self {
            Self::Eq => Ok(Self::Eq),
            Self::Neq => Ok(Self::Neq),
            Self::Lt => Ok(Self::Gt),
            Self::Lte => Ok(Self::Gte),
            Self::Gt => Ok(Self::Lt),
            Self::Gte => Ok(Self::Lte),
            Self::In => Ok(Self::Has),
            Self::Has => Ok(Self::In),
            Self::Nin => Ok(Self::NotHas),
            Self::NotHas => Ok(Self::Nin),
            Self::Like | Self::NotLike | Self::IsDefined => {
                Err(EngineError::ReverseOperator(format!("{self:?}")))
            }
        }
    }
}

/// The right-hand side of a statement: a literal or a `$scope.path`
/// variable reference.
///
/// On the wire a variable is just a `$`-prefixed string, so serialization
/// is by prefix: strings starting with `$` deserialize as variables,
/// everything else as literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Variable(String),
    Value(Value),
}

impl Operand {
    /// The variable name, if this operand is one.
    #[must_use]
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Self::Variable(name) => Some(name),
            Self::Value(_) => None,
        }
    }
}

impl Serialize for Operand {
    fn serialize<Ser: serde::Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        match self {
            Self::Variable(name) => serializer.serialize_str(name),
            Self::Value(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Operand {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) if s.starts_with('$') => Self::Variable(s),
            other => Self::Value(other),
        })
    }
}

/// One filter statement: `(path, op, operand)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub path: AttributePath,
    pub op: Op,
    pub operand: Operand,
}

/// A filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `(path, op, value-or-variable)`.
    Statement(Statement),
    /// Conjunction, short-circuit.
    And(Vec<Filter>),
    /// Disjunction, short-circuit.
    Or(Vec<Filter>),
    /// True iff the sub-query yields at least one entity.
    Exists(Box<Query>),
    /// Sugar over `Exists` for a schema-declared relation; expanded by
    /// `prepare_query`.
    Relation(String),
    /// Constant.
    Literal(bool),
}

impl Filter {
    /// A statement filter with a literal operand.
    #[must_use]
    pub fn stmt(path: impl Into<AttributePath>, op: Op, value: Value) -> Self {
        Self::Statement(Statement {
            path: path.into(),
            op,
            operand: Operand::Value(value),
        })
    }

    /// A statement filter with a variable operand.
    #[must_use]
    pub fn stmt_var(path: impl Into<AttributePath>, op: Op, variable: impl Into<String>) -> Self {
        Self::Statement(Statement {
            path: path.into(),
            op,
            operand: Operand::Variable(variable.into()),
        })
    }

    /// An exists filter over a sub-query.
    #[must_use]
    pub fn exists(query: Query) -> Self {
        Self::Exists(Box::new(query))
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// An include entry: a related sub-query grafted under an alias.
///
/// `Default` is the shorthand form (`true` / `null` in the wire format)
/// that `prepare_query` resolves against the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Include {
    Default,
    Subquery {
        query: Box<Query>,
        cardinality: Cardinality,
    },
}

/// An immutable collection query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order: Vec<OrderKey>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<After>,
    #[serde(default)]
    pub select: Option<Vec<AttributePath>>,
    #[serde(default)]
    pub include: BTreeMap<String, Include>,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    /// Stamped by `prepare_query`; skipped on the wire.
    #[serde(skip)]
    pub(crate) prepared: bool,
}

impl Query {
    /// A bare query over one collection.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            after: None,
            select: None,
            include: BTreeMap::new(),
            vars: BTreeMap::new(),
            prepared: false,
        }
    }

    /// Add a filter node.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a sort key.
    #[must_use]
    pub fn order_by(mut self, key: OrderKey) -> Self {
        self.order.push(key);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the after-cursor.
    #[must_use]
    pub fn after(mut self, value: Value, entity_id: EntityId, inclusive: bool) -> Self {
        self.after = Some(After {
            value,
            entity_id,
            inclusive,
        });
        self
    }

    /// Restrict the selected leaves.
    #[must_use]
    pub fn select(mut self, paths: Vec<AttributePath>) -> Self {
        self.select = Some(paths);
        self
    }

    /// Add an include entry.
    #[must_use]
    pub fn include(mut self, alias: impl Into<String>, include: Include) -> Self {
        self.include.insert(alias.into(), include);
        self
    }

    /// Add a query-scoped variable.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// Whether `prepare_query` has run on this value.
    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Top-level statements, with their positions in `filters`.
    pub fn statements(&self) -> impl Iterator<Item = (usize, &Statement)> {
        self.filters
            .iter()
            .enumerate()
            .filter_map(|(index, filter)| match filter {
                Filter::Statement(statement) => Some((index, statement)),
                _ => None,
            })
    }

    /// Whether any filter node (recursively) is a sub-query.
    #[must_use]
    pub fn has_subquery_filter(&self) -> bool {
        fn walk(filters: &[Filter]) -> bool {
            filters.iter().any(|filter| match filter {
                Filter::Exists(_) | Filter::Relation(_) => true,
                Filter::And(children) | Filter::Or(children) => walk(children),
                Filter::Statement(_) | Filter::Literal(_) => false,
            })
        }
        walk(&self.filters)
    }
}
