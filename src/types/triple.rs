//! Triples, entity ids and attribute paths.

use serde::{Deserialize, Serialize};

use super::timestamp::Timestamp;
use super::value::Value;

/// Separator between the collection name and the external id.
const ENTITY_ID_SEPARATOR: char = '#';

/// Reserved attribute that marks an entity's collection membership.
/// A `Null` value at this leaf with a winning timestamp tombstones the
/// entity.
pub const COLLECTION_ATTRIBUTE: &str = "_collection";

/// An entity id of the form `<collection>#<external_id>`.
///
/// INVARIANT: a well-formed id contains exactly one separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Build an id from its collection and external halves.
    #[must_use]
    pub fn new(collection: &str, external_id: &str) -> Self {
        Self(format!("{collection}{ENTITY_ID_SEPARATOR}{external_id}"))
    }

    /// The collection half of the id.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.0
            .split_once(ENTITY_ID_SEPARATOR)
            .map_or(self.0.as_str(), |(collection, _)| collection)
    }

    /// The external half of the id.
    #[must_use]
    pub fn external_id(&self) -> &str {
        self.0
            .split_once(ENTITY_ID_SEPARATOR)
            .map_or("", |(_, external)| external)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An ordered sequence of attribute keys.
///
/// Set-member triples carry the member's canonical segment form as the
/// final key, with a boolean presence value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePath(pub Vec<String>);

impl AttributePath {
    /// Parse a dotted path (`"author.name"`).
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_owned).collect())
    }

    /// Single-segment path.
    #[must_use]
    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// The `_collection` marker path.
    #[must_use]
    pub fn collection_marker() -> Self {
        Self::single(COLLECTION_ATTRIBUTE)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with one more segment appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.as_slice().to_vec();
        segments.push(segment.into());
        Self(segments)
    }

    /// Whether `prefix` is a (non-strict) prefix of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// The path with the first segment removed.
    #[must_use]
    pub fn tail(&self) -> Self {
        Self(self.0.get(1..).unwrap_or_default().to_vec())
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for AttributePath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

/// The unit of state: one immutable, client-timestamped fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub entity_id: EntityId,
    pub attribute: AttributePath,
    pub value: Value,
    pub timestamp: Timestamp,
    /// A retraction removes the leaf instead of setting it.
    #[serde(default)]
    pub retracted: bool,
}

impl Triple {
    /// Create a non-retracted triple.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        attribute: AttributePath,
        value: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity_id,
            attribute,
            value,
            timestamp,
            retracted: false,
        }
    }
}
