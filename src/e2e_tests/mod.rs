//! End-to-end tests at the engine API level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! against the in-memory store to verify the complete fetch / subscribe /
//! delta cycle.

#![cfg(test)]

mod helpers;

mod test_delta_triples;
mod test_includes;
mod test_index_point;
mod test_invariants;
mod test_limit_backfill;
mod test_range_cursor;
mod test_tombstone;
