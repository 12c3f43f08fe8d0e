//! Variable resolution.
//!
//! Variables are textual `$<scope>.<path>` references. Scopes are tagged:
//! `global`, `session`, `query`, `role`, or a number N addressing the Nth
//! ancestor frame (1 = immediate parent). A `$name` without a recognized
//! scope falls back to the flattened merge of every scope, newest wins,
//! which exists for backward compatibility and logs when the name is
//! ambiguous.
//!
//! Ancestor paths may cross a declared relation (`$1.author.name`); the
//! resolver then lazily loads the relation with a cardinality-one
//! sub-query before extracting the leaf. Cardinality-many relations are
//! rejected.

use crate::error::EngineError;
use crate::store::TripleStore;
use crate::types::{AttributePath, Cardinality, Query, Value};

use super::context::ExecutionContext;
use super::{Engine, FetchOptions};

/// A parsed variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarScope {
    Global,
    Session,
    Query,
    Role,
    /// Nth ancestor frame, 1-based.
    Ancestor(usize),
    /// Legacy unscoped name, resolved through the flat merge.
    Unscoped,
}

/// A variable split into its scope and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub scope: VarScope,
    pub path: AttributePath,
}

/// Parse a `$scope.path` reference.
///
/// # Errors
///
/// `InvalidFilter` when the name is not `$`-prefixed or names nothing.
pub fn parse_var(name: &str) -> Result<VarRef, EngineError> {
    let Some(body) = name.strip_prefix('$') else {
        return Err(EngineError::InvalidFilter(format!(
            "'{name}' is not a variable reference"
        )));
    };
    if body.is_empty() {
        return Err(EngineError::InvalidFilter(
            "empty variable reference".to_owned(),
        ));
    }

    let mut segments = body.split('.');
    let head = segments.next().unwrap_or_default();
    let rest: Vec<String> = segments.map(str::to_owned).collect();

    let scoped = |scope: VarScope| -> Result<VarRef, EngineError> {
        if rest.is_empty() {
            return Err(EngineError::InvalidFilter(format!(
                "variable '{name}' names a scope but no path"
            )));
        }
        Ok(VarRef {
            scope,
            path: AttributePath(rest.as_slice().to_vec()),
        })
    };

    match head {
        "global" => scoped(VarScope::Global),
        "session" => scoped(VarScope::Session),
        "query" => scoped(VarScope::Query),
        "role" => scoped(VarScope::Role),
        _ => match head.parse::<usize>() {
            Ok(0) => Err(EngineError::InvalidFilter(format!(
                "variable '{name}' addresses frame 0; ancestors are 1-based"
            ))),
            Ok(n) => scoped(VarScope::Ancestor(n)),
            Err(_) => Ok(VarRef {
                scope: VarScope::Unscoped,
                path: AttributePath::parse(body),
            }),
        },
    }
}

/// Outcome of a synchronous resolution attempt.
pub(crate) enum Resolution {
    /// Resolved; `None` means the variable is undefined.
    Ready(Option<Value>),
    /// The path crosses a relation that has not been loaded yet.
    NeedsRelation { frame: usize, relation: String },
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Resolve a variable without touching the store. Ancestor paths that
    /// cross an unloaded relation report `NeedsRelation` instead.
    pub(crate) fn resolve_var_ready(
        &self,
        name: &str,
        query: &Query,
        ctx: &ExecutionContext,
    ) -> Result<Resolution, EngineError> {
        let var = parse_var(name)?;
        let key = var.path.to_string();

        let ready = |value: Option<&Value>| Resolution::Ready(value.cloned());

        match var.scope {
            VarScope::Global => Ok(ready(ctx.global_vars.get(&key))),
            VarScope::Session => Ok(ready(
                ctx.session.as_ref().and_then(|session| session.vars.get(&key)),
            )),
            VarScope::Query => Ok(ready(query.vars.get(&key))),
            VarScope::Role => Ok(Resolution::Ready(
                ctx.session
                    .as_ref()
                    .and_then(|session| session.role_vars().get(&key).cloned()),
            )),
            VarScope::Unscoped => {
                let (found, hits) = ctx.flat_lookup(&key, &query.vars);
                if hits > 1 {
                    tracing::warn!(
                        variable = name,
                        scopes = hits,
                        "unscoped variable is defined in multiple scopes; newest wins"
                    );
                }
                Ok(Resolution::Ready(found))
            }
            VarScope::Ancestor(n) => {
                let Some(frame) = ctx.ancestor(n) else {
                    return Err(EngineError::InvalidFilter(format!(
                        "variable '{name}' addresses ancestor {n} but the stack is {} deep",
                        ctx.depth()
                    )));
                };
                let Some(first) = var.path.first() else {
                    return Ok(Resolution::Ready(None));
                };
                if var.path.len() == 1 {
                    return Ok(ready(frame.values.get(first)));
                }
                // Path continues past the frame's scalars: a relation hop.
                if let Some(loaded) = frame.loaded.get(first) {
                    return Ok(Resolution::Ready(loaded.as_ref().and_then(|view| {
                        view.value_at(&var.path.tail()).cloned()
                    })));
                }
                if frame.values.contains_key(first) {
                    // A scalar cannot be traversed further.
                    return Ok(Resolution::Ready(None));
                }
                Ok(Resolution::NeedsRelation {
                    frame: n,
                    relation: first.to_owned(),
                })
            }
        }
    }

    /// Fully resolve a variable, lazily loading relation hops.
    pub(crate) async fn resolve_var(
        &self,
        name: &str,
        query: &Query,
        ctx: &mut ExecutionContext,
        options: &FetchOptions,
    ) -> Result<Option<Value>, EngineError> {
        loop {
            match self.resolve_var_ready(name, query, ctx)? {
                Resolution::Ready(value) => return Ok(value),
                Resolution::NeedsRelation { frame, relation } => {
                    self.load_frame_relation(frame, &relation, ctx, options)
                        .await?;
                }
            }
        }
    }

    /// Load a cardinality-one relation into an ancestor frame.
    async fn load_frame_relation(
        &self,
        n: usize,
        relation_name: &str,
        ctx: &mut ExecutionContext,
        options: &FetchOptions,
    ) -> Result<(), EngineError> {
        let frame = ctx
            .ancestor(n)
            .cloned()
            .ok_or_else(|| EngineError::InvalidFilter(format!("no ancestor frame {n}")))?;

        let schema = self
            .schema_for(options)
            .ok_or_else(|| EngineError::UnknownRelation(relation_name.to_owned()))?;
        let relation = schema
            .relation(&frame.collection, relation_name)
            .ok_or_else(|| {
                EngineError::UnknownRelation(format!("{}.{relation_name}", frame.collection))
            })?;
        if relation.cardinality != Cardinality::One {
            return Err(EngineError::VariableRelationCardinality(format!(
                "{}.{relation_name}",
                frame.collection
            )));
        }

        let mut sub = super::prepare::prepare_query(
            &relation.query,
            Some(schema),
            options.skip_rules,
        )?;
        sub.limit = Some(1);

        // The relation query's `$1` references must see the target frame.
        ctx.push_frame(frame);
        let fetched = self.fetch_with_context(&sub, options, ctx).await;
        ctx.pop_frame();
        let result = fetched?;

        let view = result.results.into_iter().map(|(_, view)| view).next();
        if let Some(target) = ctx.ancestor_mut(n) {
            target.loaded.insert(relation_name.to_owned(), view);
        }
        Ok(())
    }
}
