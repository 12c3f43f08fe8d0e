//! Query preparation.
//!
//! Preparation canonicalizes a caller-built query into its executable
//! form: include shorthands resolve to the schema's relation sub-queries,
//! relation filter sugar expands to exists sub-queries, collection read
//! rules are injected as ordinary filters, and statements are validated.
//! The result is a new query value stamped prepared; the input is never
//! touched.

use crate::error::EngineError;
use crate::schema::Schema;
use crate::types::{Filter, Include, Op, Operand, Query, Value};

/// Prepare a query against a schema.
///
/// # Errors
///
/// `UnknownRelation` when an include shorthand or relation filter names
/// nothing in the schema; `InvalidFilter` for malformed statements.
pub fn prepare_query(
    query: &Query,
    schema: Option<&Schema>,
    skip_rules: bool,
) -> Result<Query, EngineError> {
    let mut prepared = query.clone();

    // An empty selection list means "all attributes".
    if prepared.select.as_ref().is_some_and(Vec::is_empty) {
        prepared.select = None;
    }

    prepared.filters = expand_filters(prepared.filters, &prepared.collection, schema, skip_rules)?;

    if !skip_rules {
        if let Some(rules) = schema.and_then(|s| s.collection_rules(&prepared.collection)) {
            let injected =
                expand_filters(rules.read.clone(), &prepared.collection, schema, skip_rules)?;
            prepared.filters.extend(injected);
        }
    }

    let mut include = std::mem::take(&mut prepared.include);
    for (alias, entry) in &mut include {
        match entry {
            Include::Default => {
                let relation = schema
                    .and_then(|s| s.relation(&prepared.collection, alias))
                    .ok_or_else(|| {
                        EngineError::UnknownRelation(format!(
                            "{}.{alias}",
                            prepared.collection
                        ))
                    })?;
                *entry = Include::Subquery {
                    query: Box::new(prepare_query(&relation.query, schema, skip_rules)?),
                    cardinality: relation.cardinality,
                };
            }
            Include::Subquery { query: sub, .. } => {
                **sub = prepare_query(sub, schema, skip_rules)?;
            }
        }
    }
    prepared.include = include;

    prepared.prepared = true;
    Ok(prepared)
}

fn expand_filters(
    filters: Vec<Filter>,
    collection: &str,
    schema: Option<&Schema>,
    skip_rules: bool,
) -> Result<Vec<Filter>, EngineError> {
    filters
        .into_iter()
        .map(|filter| expand_filter(filter, collection, schema, skip_rules))
        .collect()
}

fn expand_filter(
    filter: Filter,
    collection: &str,
    schema: Option<&Schema>,
    skip_rules: bool,
) -> Result<Filter, EngineError> {
    match filter {
        Filter::Relation(name) => {
            let relation = schema
                .and_then(|s| s.relation(collection, &name))
                .ok_or_else(|| EngineError::UnknownRelation(format!("{collection}.{name}")))?;
            Ok(Filter::Exists(Box::new(prepare_query(
                &relation.query,
                schema,
                skip_rules,
            )?)))
        }
        Filter::Exists(sub) => Ok(Filter::Exists(Box::new(prepare_query(
            &sub,
            schema,
            skip_rules,
        )?))),
        Filter::And(children) => Ok(Filter::And(expand_filters(
            children, collection, schema, skip_rules,
        )?)),
        Filter::Or(children) => Ok(Filter::Or(expand_filters(
            children, collection, schema, skip_rules,
        )?)),
        Filter::Statement(statement) => {
            if statement.path.is_empty() {
                return Err(EngineError::InvalidFilter(
                    "statement with empty path".to_owned(),
                ));
            }
            if matches!(statement.op, Op::In | Op::Nin) {
                if let Operand::Value(value) = &statement.operand {
                    if !matches!(value, Value::Array(_)) {
                        return Err(EngineError::InvalidFilter(format!(
                            "'{}' on '{}' requires a list operand",
                            if statement.op == Op::In { "in" } else { "nin" },
                            statement.path
                        )));
                    }
                }
            }
            Ok(Filter::Statement(statement))
        }
        literal @ Filter::Literal(_) => Ok(literal),
    }
}
