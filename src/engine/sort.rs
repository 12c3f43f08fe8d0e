//! Sorting, the after-cursor, and the limit.
//!
//! Sort keys go through the total-order byte encoding so cross-type
//! comparisons are deterministic; a missing value encodes as MIN. Ties on
//! every order key break on the entity id, ascending, which makes the
//! ordering total (and cursors unambiguous).

use std::cmp::Ordering;

use crate::types::{
    cmp_optional, encode_optional, After, Direction, EntityId, EntityView, OrderKey, Triple, Value,
};

/// One surviving entity, pre-sort.
pub(crate) type ResultEntity = (EntityId, EntityView, Vec<Triple>);

/// Stable sort by the order keys, entity id as the final tiebreaker.
pub(crate) fn sort_entities(entities: &mut Vec<ResultEntity>, order: &[OrderKey]) {
    if order.is_empty() {
        entities.sort_by(|a, b| a.0.cmp(&b.0));
        return;
    }

    let mut decorated: Vec<(Vec<Vec<u8>>, ResultEntity)> = std::mem::take(entities)
        .into_iter()
        .map(|entry| {
            let keys = order
                .iter()
                .map(|key| encode_optional(entry.1.value_at(&key.path)))
                .collect();
            (keys, entry)
        })
        .collect();

    decorated.sort_by(|(a_keys, a), (b_keys, b)| {
        for (index, key) in order.iter().enumerate() {
            let mut cmp = a_keys[index].cmp(&b_keys[index]);
            if key.direction == Direction::Desc {
                cmp = cmp.reverse();
            }
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        a.0.cmp(&b.0)
    });

    *entities = decorated.into_iter().map(|(_, entry)| entry).collect();
}

/// Pairwise comparison of two entities under the order keys, id tiebreak.
pub(crate) fn compare_entities(
    a: (&EntityView, &EntityId),
    b: (&EntityView, &EntityId),
    order: &[OrderKey],
) -> Ordering {
    for key in order {
        let mut cmp = cmp_optional(a.0.value_at(&key.path), b.0.value_at(&key.path));
        if key.direction == Direction::Desc {
            cmp = cmp.reverse();
        }
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.1.cmp(b.1)
}

/// One-pass stateful after-cursor predicate over a sorted stream.
///
/// Tracks whether the cursor's value has been reached, whether its entity
/// id has been reached, and whether its value has been passed. An element
/// is admitted once either the cursor value is passed, or both value and
/// id are reached — the element equal to the cursor itself only with
/// `inclusive`.
pub(crate) struct AfterPredicate<'a> {
    after: &'a After,
    direction: Direction,
    /// Cursor over a query with no order keys compares ids alone.
    by_id_only: bool,
    value_reached: bool,
    id_reached: bool,
    value_passed: bool,
}

impl<'a> AfterPredicate<'a> {
    pub(crate) fn new(after: &'a After, order: &[OrderKey]) -> Self {
        Self {
            after,
            direction: order.first().map_or(Direction::Asc, |key| key.direction),
            by_id_only: order.is_empty(),
            value_reached: false,
            id_reached: false,
            value_passed: false,
        }
    }

    /// Whether the next element (in sort order) is past the cursor.
    pub(crate) fn admit(&mut self, value: Option<&Value>, id: &EntityId) -> bool {
        if self.by_id_only {
            if self.value_passed {
                return true;
            }
            if *id == self.after.entity_id {
                self.value_passed = true;
                return self.after.inclusive;
            }
            return false;
        }

        let mut cmp = cmp_optional(value, Some(&self.after.value));
        if self.direction == Direction::Desc {
            cmp = cmp.reverse();
        }
        match cmp {
            Ordering::Greater => self.value_passed = true,
            Ordering::Equal => self.value_reached = true,
            Ordering::Less => {}
        }

        if self.value_passed {
            return true;
        }
        if self.value_reached {
            if *id == self.after.entity_id {
                self.id_reached = true;
                return self.after.inclusive;
            }
            if self.id_reached {
                return true;
            }
        }
        false
    }
}

/// Pairwise cursor test for the incremental subscription path, where
/// elements arrive one at a time instead of in sort order. Equivalent to
/// the stateful predicate because the ordering is total.
pub(crate) fn after_admits(
    after: &After,
    order: &[OrderKey],
    value: Option<&Value>,
    id: &EntityId,
) -> bool {
    if order.is_empty() {
        return match id.cmp(&after.entity_id) {
            Ordering::Greater => true,
            Ordering::Equal => after.inclusive,
            Ordering::Less => false,
        };
    }
    let mut cmp = cmp_optional(value, Some(&after.value));
    if order[0].direction == Direction::Desc {
        cmp = cmp.reverse();
    }
    match cmp {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match id.cmp(&after.entity_id) {
            Ordering::Greater => true,
            Ordering::Equal => after.inclusive,
            Ordering::Less => false,
        },
    }
}
