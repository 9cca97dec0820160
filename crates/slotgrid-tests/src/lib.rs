//! Cross-crate test suite for SlotGrid.
//!
//! Property tests check the ledger invariants over random registration trees,
//! rate tables and deposit streams. End-to-end tests walk concrete scenarios
//! through the engine against both ledger backends.

pub mod helpers;
