//! # slotgrid-core
//! Foundation types and traits for the SlotGrid ledger.

pub mod apply;
pub mod constants;
pub mod error;
pub mod memory;
pub mod staged;
pub mod tiers;
pub mod traits;
pub mod types;
pub mod vip;
