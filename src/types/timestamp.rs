//! Hybrid-logical timestamps and causal state vectors.
//!
//! A timestamp is `(tick, client_id)` compared lexicographically: the tick
//! first, the client id as tiebreaker. A state vector records, per client,
//! the highest tick observed; it bounds materialization to a causal
//! frontier.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hybrid-logical timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Logical tick.
    pub tick: u64,
    /// Originating client, used as the comparison tiebreaker.
    pub client_id: String,
}

impl Timestamp {
    /// Create a new timestamp.
    #[must_use]
    pub fn new(tick: u64, client_id: impl Into<String>) -> Self {
        Self {
            tick,
            client_id: client_id.into(),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.tick, self.client_id)
    }
}

/// Per-client causal frontier: everything with `tick <= frontier[client]`
/// has been seen from that client.
///
/// A client absent from the vector is unbounded — all of its triples are
/// visible. This matches the delta engine's use, where only the clients
/// appearing in a write batch are pushed back below the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    ticks: HashMap<String, u64>,
}

impl StateVector {
    /// Create an empty (fully unbounded) state vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frontier for one client.
    pub fn set(&mut self, client_id: impl Into<String>, tick: u64) {
        self.ticks.insert(client_id.into(), tick);
    }

    /// Get the frontier for one client, if bounded.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<u64> {
        self.ticks.get(client_id).copied()
    }

    /// Whether a timestamp is within the frontier.
    #[must_use]
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        match self.ticks.get(&timestamp.client_id) {
            Some(frontier) => timestamp.tick <= *frontier,
            None => true,
        }
    }

    /// Iterate over the bounded clients.
    pub fn iter(&self) -> impl Iterator<Item = (&String, u64)> {
        self.ticks.iter().map(|(client, tick)| (client, *tick))
    }
}
