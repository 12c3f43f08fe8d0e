//! Entity materialization.
//!
//! Folds an entity's triples into a timestamped view. Scan indexes can be
//! stale relative to causality, so every candidate is re-materialized from
//! the entity log before filters run. An optional state-vector bound
//! restricts the fold to triples within the causal frontier — that is the
//! "before view" the delta engine compares against.

use futures::TryStreamExt;

use crate::error::EngineError;
use crate::store::TripleStore;
use crate::types::{EntityId, EntityView, StateVector, Triple};

use super::Engine;

impl<S: TripleStore + 'static> Engine<S> {
    /// Materialize one entity, returning the view and the triples that
    /// produced it (for the result-triple set).
    pub(crate) async fn materialize(
        &self,
        entity_id: &EntityId,
        bound: Option<&StateVector>,
    ) -> Result<(EntityView, Vec<Triple>), EngineError> {
        let mut stream = self.store().find_by_entity(entity_id).await?;
        let mut view = EntityView::new(entity_id.clone());
        let mut captured = Vec::new();

        while let Some(triple) = stream.try_next().await? {
            if let Some(bound) = bound {
                if !bound.contains(&triple.timestamp) {
                    continue;
                }
            }
            view.apply(&triple);
            captured.push(triple);
        }

        Ok((view, captured))
    }
}
