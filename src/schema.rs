//! Read-only schema service.
//!
//! The engine consumes schemas, it never defines or mutates them. A schema
//! names each collection's attribute tree, its declared relations (with the
//! sub-query that loads them), optional read rules that `prepare_query`
//! injects as ordinary filters, and the JS-facing value coercion used when
//! emitting subscription results.
//!
//! Everything here is plain serde data so callers can load schemas from
//! their own definition files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    AttributePath, Cardinality, EntityView, Filter, Operand, Query, Value, COLLECTION_ATTRIBUTE,
};

/// Attribute data types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Set(Box<DataType>),
    Record(BTreeMap<String, DataType>),
}

impl DataType {
    /// Whether an equality scan can be keyed on this type.
    #[must_use]
    pub const fn is_scalar_or_set(&self) -> bool {
        !matches!(self, Self::Record(_))
    }
}

/// A declared relation: the sub-query that loads it and its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub cardinality: Cardinality,
    pub query: Query,
}

/// Collection access rules. Read rules become ordinary filters during
/// query preparation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub read: Vec<Filter>,
}

/// One collection's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    #[serde(default)]
    pub attributes: BTreeMap<String, DataType>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDef>,
    #[serde(default)]
    pub rules: Option<Rules>,
}

/// A database schema: one entry per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub collections: BTreeMap<String, CollectionSchema>,
}

/// A session role contributing variables to the `role` scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

/// Per-session context: session variables and granted roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Session {
    /// Union of all role-provided variables, later roles winning.
    #[must_use]
    pub fn role_vars(&self) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for role in &self.roles {
            for (name, value) in &role.vars {
                merged.insert(name.as_str().to_owned(), value.clone());
            }
        }
        merged
    }
}

impl Schema {
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// The data type at a path, walking nested records.
    ///
    /// Returns `None` when the path is undeclared or crosses a relation;
    /// a path continuing past a `Set` (a member segment) also resolves to
    /// `None` — members are not attributes.
    #[must_use]
    pub fn attribute(&self, collection: &str, path: &AttributePath) -> Option<&DataType> {
        let mut segments = path.segments().iter();
        let first = segments.next()?;
        let mut current = self.collections.get(collection)?.attributes.get(first)?;
        for segment in segments {
            match current {
                DataType::Record(fields) => current = fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// A declared relation by name.
    #[must_use]
    pub fn relation(&self, collection: &str, name: &str) -> Option<&RelationDef> {
        self.collections.get(collection)?.relations.get(name)
    }

    /// The collection's access rules, if any.
    #[must_use]
    pub fn collection_rules(&self, collection: &str) -> Option<&Rules> {
        self.collections.get(collection)?.rules.as_ref()
    }

    /// Whether the variable-aware cache may serve this query.
    ///
    /// Session- and role-scoped variables vary per caller, and unscoped
    /// variables resolve ambiguously, so any of them disqualifies the
    /// query. Ancestor references (`$1.…`) are exactly what the cache
    /// parameterizes over and stay cachable.
    #[must_use]
    pub fn can_cache_query(&self, query: &Query) -> bool {
        fn operand_cachable(operand: &Operand) -> bool {
            match operand.as_variable() {
                None => true,
                Some(name) => {
                    let scope = name
                        .trim_start_matches('$')
                        .split('.')
                        .next()
                        .unwrap_or_default();
                    scope == "global"
                        || scope == "query"
                        || scope.parse::<usize>().is_ok()
                }
            }
        }
        fn filters_cachable(filters: &[Filter]) -> bool {
            filters.iter().all(|filter| match filter {
                Filter::Statement(statement) => operand_cachable(&statement.operand),
                Filter::And(children) | Filter::Or(children) => filters_cachable(children),
                Filter::Exists(sub) => filters_cachable(&sub.filters),
                Filter::Relation(_) => false,
                Filter::Literal(_) => true,
            })
        }
        filters_cachable(&query.filters)
    }
}

/// Convert an entity view to its JS-facing value: timestamps stripped,
/// sets coerced to arrays, nested paths to nested objects.
#[must_use]
pub fn entity_to_json(
    view: &EntityView,
    schema: Option<&Schema>,
    select: Option<&[AttributePath]>,
) -> serde_json::Value {
    let collection = view.collection().to_owned();
    let mut root = serde_json::Map::new();
    root.insert(
        "id".to_owned(),
        serde_json::Value::String(view.id.external_id().to_owned()),
    );

    let mut set_paths: Vec<(AttributePath, DataType)> = Vec::new();

    for (path, leaf) in view.leaves() {
        if path.first() == Some(COLLECTION_ATTRIBUTE) {
            continue;
        }
        let Some(value) = &leaf.value else { continue };
        if !selected(path, select) {
            continue;
        }

        // Set leaves are member markers; collect the set once instead.
        if let Some(schema) = schema {
            if let Some((set_path, inner)) = owning_set(schema, &collection, path) {
                if !set_paths.iter().any(|(p, _)| *p == set_path) {
                    set_paths.push((set_path, inner));
                }
                continue;
            }
        }

        insert_nested(&mut root, path.segments(), value_to_json(value));
    }

    for (set_path, inner) in set_paths {
        let members: Vec<serde_json::Value> = view
            .set_members(&set_path)
            .into_iter()
            .map(|member| member_to_json(member, &inner))
            .collect();
        insert_nested(
            &mut root,
            set_path.segments(),
            serde_json::Value::Array(members),
        );
    }

    serde_json::Value::Object(root)
}

/// Whether a leaf survives the `select` projection. `id`, `_collection`
/// and order keys are the caller's concern; this only checks prefixes.
fn selected(path: &AttributePath, select: Option<&[AttributePath]>) -> bool {
    match select {
        None => true,
        Some(paths) => paths
            .iter()
            .any(|selected| path.starts_with(selected) || selected.starts_with(path)),
    }
}

/// If `path` is a member leaf of a schema-declared set, the set's path and
/// inner type.
fn owning_set(
    schema: &Schema,
    collection: &str,
    path: &AttributePath,
) -> Option<(AttributePath, DataType)> {
    if path.len() < 2 {
        return None;
    }
    let parent = AttributePath(path.segments()[..path.len() - 1].to_vec());
    match schema.attribute(collection, &parent) {
        Some(DataType::Set(inner)) => Some((parent, (**inner).clone())),
        _ => None,
    }
}

/// Decode a set-member segment back to a JSON value per the inner type.
fn member_to_json(member: &str, inner: &DataType) -> serde_json::Value {
    match inner {
        DataType::Number => member
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        DataType::Boolean => serde_json::Value::Bool(member == "true"),
        _ => serde_json::Value::String(member.to_owned()),
    }
}

fn insert_nested(
    object: &mut serde_json::Map<String, serde_json::Value>,
    segments: &[String],
    value: serde_json::Value,
) {
    match segments {
        [] => {}
        [leaf] => {
            object.insert(leaf.as_str().to_owned(), value);
        }
        [head, rest @ ..] => {
            let child = object
                .entry(head.as_str().to_owned())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(map) = child {
                insert_nested(map, rest, value);
            }
        }
    }
}

/// Convert one triple value to JSON.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.as_str().to_owned()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
    }
}
