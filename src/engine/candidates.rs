//! Candidate streams.
//!
//! Turns the chosen access path into a lazy, de-duplicated sequence of
//! entity ids. Ordered scans can surface several triple versions of the
//! same entity; the versioned dedup keeps a max-timestamp register per
//! entity (scans cover a single attribute) and emits each entity at most
//! once — on the first triple that beats the register, which a tie does
//! not.

use std::collections::{HashMap, HashSet};

use futures::TryStreamExt;

use crate::error::EngineError;
use crate::store::{TripleStore, TripleStream};
use crate::types::{EntityId, Timestamp};

use super::select::{collection_scan_key, AccessPath, IndexSelection};
use super::Engine;

/// A pull stream of candidate entity ids.
pub(crate) enum CandidateStream {
    Single(Option<EntityId>),
    Deduped {
        triples: TripleStream,
        seen: HashSet<EntityId>,
    },
    Versioned {
        triples: TripleStream,
        newest: HashMap<EntityId, Timestamp>,
        emitted: HashSet<EntityId>,
    },
}

impl CandidateStream {
    /// The next candidate id, or `None` at exhaustion.
    pub(crate) async fn next(&mut self) -> Result<Option<EntityId>, EngineError> {
        match self {
            Self::Single(slot) => Ok(slot.take()),
            Self::Deduped { triples, seen } => {
                while let Some(triple) = triples.try_next().await? {
                    if seen.insert(triple.entity_id.clone()) {
                        return Ok(Some(triple.entity_id));
                    }
                }
                Ok(None)
            }
            Self::Versioned {
                triples,
                newest,
                emitted,
            } => {
                while let Some(triple) = triples.try_next().await? {
                    let beats = newest
                        .get(&triple.entity_id)
                        .is_none_or(|seen| triple.timestamp > *seen);
                    if !beats {
                        continue;
                    }
                    newest.insert(triple.entity_id.clone(), triple.timestamp.clone());
                    if emitted.insert(triple.entity_id.clone()) {
                        return Ok(Some(triple.entity_id));
                    }
                }
                Ok(None)
            }
        }
    }
}

impl<S: TripleStore + 'static> Engine<S> {
    /// Open the candidate stream for a selection. A historical fetch
    /// scans the collection marker without a value match, so entities
    /// tombstoned on the current frontier still surface.
    pub(crate) async fn open_candidates(
        &self,
        collection: &str,
        selection: &IndexSelection,
        historical: bool,
    ) -> Result<CandidateStream, EngineError> {
        match &selection.path {
            AccessPath::IdPoint { entity_id } => {
                Ok(CandidateStream::Single(Some(entity_id.clone())))
            }
            AccessPath::EqualityScan { key, value } => {
                let triples = self.store().find_by_ave(key, value.as_ref()).await?;
                Ok(CandidateStream::Deduped {
                    triples,
                    seen: HashSet::new(),
                })
            }
            AccessPath::RangeScan { key, range } | AccessPath::OrderScan { key, range } => {
                let triples = self.store().find_values_in_range(key, range).await?;
                Ok(CandidateStream::Versioned {
                    triples,
                    newest: HashMap::new(),
                    emitted: HashSet::new(),
                })
            }
            AccessPath::CollectionScan => {
                let (key, value) = collection_scan_key(collection);
                let value = if historical { None } else { Some(value) };
                let triples = self.store().find_by_ave(&key, value.as_ref()).await?;
                Ok(CandidateStream::Deduped {
                    triples,
                    seen: HashSet::new(),
                })
            }
        }
    }
}
