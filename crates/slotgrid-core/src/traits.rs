//! Trait interfaces for the SlotGrid ledger.
//!
//! - [`LedgerStore`]: persisted slots, deposits, entries, referrals and config
//!   (`MemoryLedger` here, `RocksLedger` in slotgrid-node)
//! - [`Clock`]: wall-clock source, swappable in tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::GridError;
use crate::types::{
    AreaAggregate, Balance, DepositHash, DepositRecord, Lease, LedgerEntry, Referral,
    ReferralActivation, Rejection, Slot, SlotId, UserId, UserInfo,
};

/// One mutation inside a [`LedgerBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerOp {
    /// Insert a new slot. Its id must be the next in the global sequence.
    CreateSlot(Slot),
    /// Credit a slot, guarded by `status = running` at apply time.
    CreditSlot { id: SlotId, amount: u64, now: i64 },
    /// Close the gap left by a stopped slot. No-op once compacted.
    ShiftAfter { stopped: SlotId },
    /// Record a processed deposit. Rejected if the hash is already known.
    CreateDeposit(DepositRecord),
    /// Append a ledger entry. The store assigns `seq`; a positive amount
    /// attributed to a user also raises that user's primary balance.
    AppendEntry(LedgerEntry),
    CreditBalance { user: UserId, primary: u64, bonus: u64 },
    AddArea { user: UserId, self_delta: u64, area_delta: u64 },
    PutUserInfo(UserInfo),
    /// Create a referral. Chains are immutable, so an existing one is rejected.
    PutReferral(Referral),
    RecordActivation(ReferralActivation),
    PutRejection(Rejection),
}

/// Ordered mutations committed atomically by [`LedgerStore::apply`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    pub ops: Vec<LedgerOp>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: LedgerOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Persisted ledger state.
///
/// All reads reflect committed state only. Writes go through [`apply`],
/// which either applies every op of a batch or none.
///
/// [`apply`]: LedgerStore::apply
pub trait LedgerStore: Send + Sync {
    /// Look up a slot by id.
    fn get_slot(&self, id: SlotId) -> Result<Option<Slot>, GridError>;

    /// Highest-id slot whose status is running.
    fn last_running_slot(&self) -> Result<Option<Slot>, GridError>;

    /// Every running slot, ascending by id.
    fn running_slots(&self) -> Result<Vec<Slot>, GridError>;

    /// Every slot owned by `user`, ascending by id.
    fn user_slots(&self, user: UserId) -> Result<Vec<Slot>, GridError>;

    /// Slots with id strictly greater than `id`, ascending.
    fn slots_after(&self, id: SlotId) -> Result<Vec<Slot>, GridError>;

    /// Stopped slots whose gap has not been compacted yet, ascending by id.
    fn slots_pending_recycle(&self) -> Result<Vec<Slot>, GridError>;

    /// Running slots on `row`, or on `col` within `span` rows of `row`.
    ///
    /// The row window is `max(1, row - span) ..= row + span`.
    fn running_slots_near(&self, row: u64, col: u8, span: u64) -> Result<Vec<Slot>, GridError>;

    /// Id the next created slot must carry.
    fn next_slot_id(&self) -> Result<SlotId, GridError>;

    /// Batch lookup of deposit records. Unknown hashes are absent from the map.
    fn deposits_by_hash(
        &self,
        hashes: &[DepositHash],
    ) -> Result<HashMap<DepositHash, DepositRecord>, GridError>;

    fn referral(&self, user: UserId) -> Result<Option<Referral>, GridError>;

    fn user_info(&self, user: UserId) -> Result<Option<UserInfo>, GridError>;

    fn area(&self, user: UserId) -> Result<Option<AreaAggregate>, GridError>;

    fn balance(&self, user: UserId) -> Result<Option<Balance>, GridError>;

    /// Ledger entries produced by the placement of `source`, in append order.
    fn entries_for_slot(&self, source: SlotId) -> Result<Vec<LedgerEntry>, GridError>;

    /// Referral activations credited to `referrer`, in append order.
    fn activations(&self, referrer: UserId) -> Result<Vec<ReferralActivation>, GridError>;

    fn rejection(&self, hash: &str) -> Result<Option<Rejection>, GridError>;

    /// Batch-get named parameters. Missing keys are absent from the map.
    fn config_values(&self, keys: &[&str]) -> Result<HashMap<String, i64>, GridError>;

    fn set_config_value(&self, key: &str, value: i64) -> Result<(), GridError>;

    /// Atomically apply every op in `batch`, or none of them.
    fn apply(&self, batch: LedgerBatch) -> Result<(), GridError>;

    /// Take the batch lease if it is free, expired, or already ours.
    ///
    /// # Errors
    ///
    /// [`LeaseError::Held`](crate::error::LeaseError::Held) while another owner holds it.
    fn try_acquire_lease(&self, owner: &str, now: i64, ttl_secs: i64) -> Result<Lease, GridError>;

    /// Release the lease if `owner` holds it. Returns whether it was released.
    fn release_lease(&self, owner: &str) -> Result<bool, GridError>;

    /// Highest-id slot owned by `user`.
    fn last_user_slot(&self, user: UserId) -> Result<Option<Slot>, GridError> {
        Ok(self.user_slots(user)?.pop())
    }

    /// Highest-id stopped slot owned by `user`.
    fn last_user_stopped_slot(&self, user: UserId) -> Result<Option<Slot>, GridError> {
        Ok(self.user_slots(user)?.into_iter().rev().find(|s| !s.is_running()))
    }

    /// Highest-id running slot owned by `user`.
    fn last_user_running_slot(&self, user: UserId) -> Result<Option<Slot>, GridError> {
        Ok(self.user_slots(user)?.into_iter().rev().find(Slot::is_running))
    }

    fn has_running_slot(&self, user: UserId) -> Result<bool, GridError> {
        Ok(self.last_user_running_slot(user)?.is_some())
    }
}

/// Source of the current time in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Matches the row/column neighbourhood rule of
/// [`LedgerStore::running_slots_near`] for a single slot.
pub fn is_near(slot: &Slot, row: u64, col: u8, span: u64) -> bool {
    let lo = row.saturating_sub(span).max(1);
    let hi = row.saturating_add(span);
    slot.coord.row == row || (slot.coord.col == col && (lo..=hi).contains(&slot.coord.row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;

    // ------------------------------------------------------------------
    // Object safety
    // ------------------------------------------------------------------

    fn _assert_ledger_store_object_safe(_: &dyn LedgerStore) {}
    fn _assert_clock_object_safe(_: &dyn Clock) {}

    // ------------------------------------------------------------------
    // Neighbourhood rule
    // ------------------------------------------------------------------

    fn at(row: u64, col: u8) -> Slot {
        Slot::open(1, 1, Coordinate::new(row, col), 1, 0, 10, 0)
    }

    #[test]
    fn same_row_is_near_at_any_distance() {
        assert!(is_near(&at(4, 3), 4, 1, 0));
    }

    #[test]
    fn same_column_within_span() {
        assert!(is_near(&at(2, 2), 4, 2, 2));
        assert!(is_near(&at(6, 2), 4, 2, 2));
        assert!(!is_near(&at(7, 2), 4, 2, 2));
        assert!(!is_near(&at(1, 2), 4, 2, 2));
    }

    #[test]
    fn window_floors_at_row_one() {
        assert!(is_near(&at(1, 1), 2, 1, 5));
        assert!(!is_near(&at(0, 1), 2, 1, 5));
    }

    #[test]
    fn other_column_other_row_is_not_near() {
        assert!(!is_near(&at(3, 1), 4, 2, 3));
    }

    // ------------------------------------------------------------------
    // Clocks
    // ------------------------------------------------------------------

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(60);
        assert_eq!(clock.now(), 1_060);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn batch_push_and_len() {
        let mut batch = LedgerBatch::new();
        assert!(batch.is_empty());
        batch.push(LedgerOp::ShiftAfter { stopped: 3 });
        assert_eq!(batch.len(), 1);
    }
}
