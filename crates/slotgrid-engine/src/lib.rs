//! # slotgrid-engine: matrix placement and tiered reward distribution.
//!
//! All amounts are integer base units; percentages are whole percent applied
//! with a 128-bit intermediate.
//!
//! - **Placement**: each deposit opens a slot at the next coordinate of one
//!   global row-major sequence, derived from the ledger on every placement.
//! - **Recycler**: stopped slots are compacted out of the sequence once.
//! - **Distribution**: matrix siblings, direct referrer, depth and waterfall
//!   rewards, area aggregates, then the system residual.
//! - **Intake**: batch replay of external deposit events, idempotent by hash,
//!   plus operator entry and VIP overrides.

pub mod distribution;
pub mod intake;
pub mod lock;
pub mod params;
pub mod placement;
pub mod recycler;
pub mod registry;
pub mod settings;

pub use intake::{Applied, BatchReport, Engine};
pub use params::RewardParams;
pub use settings::{EngineSettings, LeaseSettings, MatrixMode};
