//! Recycler: closes the grid gaps left by stopped slots.
//!
//! Each pending stopped slot is compacted in its own transaction, in id order.
//! A failing compaction is logged and left pending for the next run.

use slotgrid_core::error::GridError;
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::traits::LedgerStore;
use slotgrid_core::types::SlotId;
use tracing::{debug, warn};

/// Outcome of one recycler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub compacted: usize,
    pub failed: usize,
    /// Total coordinate shifts applied.
    pub shifted: usize,
}

/// Compact one stopped slot. Returns the number of slots shifted.
pub fn compact_slot(store: &dyn LedgerStore, stopped: SlotId) -> Result<usize, GridError> {
    let mut tx = StagedLedger::new(store);
    let shifted = tx.shift_after(stopped)?;
    tx.commit()?;
    Ok(shifted)
}

/// Compact every stopped slot whose gap is still open.
pub fn compact_pending(store: &dyn LedgerStore) -> Result<CompactionReport, GridError> {
    let mut report = CompactionReport::default();
    for slot in store.slots_pending_recycle()? {
        match compact_slot(store, slot.id) {
            Ok(shifted) => {
                debug!(slot = slot.id, shifted, "compacted stopped slot");
                report.compacted += 1;
                report.shifted += shifted;
            }
            Err(e) => {
                warn!(slot = slot.id, "compaction failed: {e}");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
