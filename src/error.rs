//! Error types for the query engine.
//!
//! Validation errors fail the whole `fetch`; nothing partial is returned.
//! Errors raised inside a subscription callback are routed to the
//! subscription's `on_error` handler and never tear the subscription down.

use std::fmt;

/// Errors produced by the query engine.
#[derive(Debug)]
pub enum EngineError {
    /// A query carrying includes or relation sugar was executed without
    /// being run through `prepare_query` first.
    QueryNotPrepared(String),
    /// A malformed filter statement or group.
    InvalidFilter(String),
    /// A variable path resolves through a cardinality-many relation.
    VariableRelationCardinality(String),
    /// A schema lookup of a relation path failed.
    UnknownRelation(String),
    /// Root-permutation reversal encountered an operator with no inverse.
    ReverseOperator(String),
    /// A schema node of unknown or unusable kind was encountered.
    InvalidSchemaItem(String),
    /// The underlying triple store failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryNotPrepared(detail) => {
                write!(f, "query has not been prepared: {detail}")
            }
            Self::InvalidFilter(detail) => write!(f, "invalid filter: {detail}"),
            Self::VariableRelationCardinality(var) => write!(
                f,
                "variable '{var}' resolves through a cardinality-many relation"
            ),
            Self::UnknownRelation(path) => write!(f, "unknown relation '{path}'"),
            Self::ReverseOperator(op) => {
                write!(f, "operator '{op}' has no inverse for edge reversal")
            }
            Self::InvalidSchemaItem(detail) => write!(f, "invalid schema item: {detail}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors produced by a triple-store implementation.
#[derive(Debug)]
pub enum StoreError {
    /// An index read failed.
    Read(String),
    /// A write could not be applied.
    Write(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(detail) => write!(f, "index read failed: {detail}"),
            Self::Write(detail) => write!(f, "write failed: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}
