//! Materialized entity views.
//!
//! An entity view is the fold of an entity's triples: a mapping from
//! attribute path to the winning `(value, timestamp)` pair, last-write-wins
//! per leaf. Retractions keep their timestamp so an older write cannot
//! resurrect a removed leaf.

use std::collections::BTreeMap;

use super::timestamp::Timestamp;
use super::triple::{AttributePath, EntityId, Triple, COLLECTION_ATTRIBUTE};
use super::value::Value;

/// One leaf of an entity view.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// `None` when the winning triple is a retraction.
    pub value: Option<Value>,
    pub timestamp: Timestamp,
}

/// A timestamped view of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub id: EntityId,
    leaves: BTreeMap<AttributePath, Leaf>,
}

impl EntityView {
    /// An empty view for the given entity.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            leaves: BTreeMap::new(),
        }
    }

    /// Fold one triple into the view; the greater timestamp wins per leaf.
    pub fn apply(&mut self, triple: &Triple) {
        let incoming = Leaf {
            value: if triple.retracted {
                None
            } else {
                Some(triple.value.clone())
            },
            timestamp: triple.timestamp.clone(),
        };
        match self.leaves.get_mut(&triple.attribute) {
            Some(existing) => {
                if incoming.timestamp > existing.timestamp {
                    *existing = incoming;
                }
            }
            None => {
                self.leaves.insert(triple.attribute.clone(), incoming);
            }
        }
    }

    /// The winning value at a leaf, if present and not retracted.
    #[must_use]
    pub fn value_at(&self, path: &AttributePath) -> Option<&Value> {
        self.leaves.get(path).and_then(|leaf| leaf.value.as_ref())
    }

    /// The winning leaf at a path, retracted or not.
    #[must_use]
    pub fn leaf_at(&self, path: &AttributePath) -> Option<&Leaf> {
        self.leaves.get(path)
    }

    /// Whether the entity is tombstoned: the `_collection` leaf carries a
    /// winning `Null`.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        matches!(
            self.value_at(&AttributePath::collection_marker()),
            Some(Value::Null)
        )
    }

    /// The collection recorded in the view, falling back to the id.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self.value_at(&AttributePath::collection_marker()) {
            Some(Value::String(collection)) => collection,
            _ => self.id.collection(),
        }
    }

    /// Present member segments of a set attribute: child leaves with a
    /// winning `true`.
    #[must_use]
    pub fn set_members(&self, path: &AttributePath) -> Vec<&str> {
        self.children_of(path)
            .filter_map(|(member, leaf)| match leaf.value {
                Some(Value::Boolean(true)) => {
                    member.segments().last().map(String::as_str)
                }
                _ => None,
            })
            .collect()
    }

    /// Leaves strictly below `path` (one level deeper).
    pub fn children_of<'s>(
        &'s self,
        path: &AttributePath,
    ) -> impl Iterator<Item = (&'s AttributePath, &'s Leaf)> + 's {
        let prefix = path.clone();
        self.leaves.iter().filter(move |(candidate, _)| {
            candidate.len() == prefix.len() + 1 && candidate.starts_with(&prefix)
        })
    }

    /// Whether anything is stored at or below the path.
    #[must_use]
    pub fn is_defined(&self, path: &AttributePath) -> bool {
        self.value_at(path).is_some()
            || self
                .leaves
                .iter()
                .any(|(candidate, leaf)| candidate.starts_with(path) && leaf.value.is_some())
    }

    /// All leaves in path order.
    pub fn leaves(&self) -> impl Iterator<Item = (&AttributePath, &Leaf)> {
        self.leaves.iter()
    }

    /// Top-level scalar leaves, as a frame for variable resolution.
    ///
    /// Absent attributes stay absent (undefined); `_collection` is always
    /// present for materialized entities.
    #[must_use]
    pub fn scalar_frame(&self) -> BTreeMap<String, Value> {
        let mut frame = BTreeMap::new();
        for (path, leaf) in &self.leaves {
            if path.len() == 1 {
                if let Some(value) = &leaf.value {
                    frame.insert(path.segments()[0].as_str().to_owned(), value.clone());
                }
            }
        }
        frame
            .entry("id".to_owned())
            .or_insert_with(|| Value::String(self.id.external_id().to_owned()));
        frame
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Fold triples into a view, optionally ignoring the `_collection` marker
/// when deciding emptiness.
#[must_use]
pub fn fold_triples(id: EntityId, triples: &[Triple]) -> EntityView {
    let mut view = EntityView::new(id);
    for triple in triples {
        view.apply(triple);
    }
    view
}

/// Whether a view holds any leaf besides the collection marker.
#[must_use]
pub fn has_user_data(view: &EntityView) -> bool {
    view.leaves()
        .any(|(path, leaf)| path.first() != Some(COLLECTION_ATTRIBUTE) && leaf.value.is_some())
}
