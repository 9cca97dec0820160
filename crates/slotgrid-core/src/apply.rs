//! Batch application shared by every [`LedgerStore`](crate::traits::LedgerStore).
//!
//! A store exposes its state (or a write-through working set over it) as an
//! [`ApplyTarget`]; [`apply_batch`] enforces the per-op guards. Any error
//! leaves the caller responsible for discarding the working set.

use crate::error::{ConflictError, GridError, ValidationError};
use crate::traits::{LedgerBatch, LedgerOp};
use crate::types::{
    AreaAggregate, Balance, DepositHash, DepositRecord, LedgerEntry, Referral, ReferralActivation,
    Rejection, Slot, SlotId, UserId, UserInfo,
};

/// Mutable view a store hands to [`apply_batch`].
///
/// Reads must observe earlier puts made through the same target.
pub trait ApplyTarget {
    fn slot(&mut self, id: SlotId) -> Result<Option<Slot>, GridError>;
    fn slots_after(&mut self, id: SlotId) -> Result<Vec<Slot>, GridError>;
    fn next_slot_id(&mut self) -> Result<SlotId, GridError>;
    fn deposit_exists(&mut self, hash: &DepositHash) -> Result<bool, GridError>;
    fn referral_exists(&mut self, user: UserId) -> Result<bool, GridError>;
    fn balance(&mut self, user: UserId) -> Result<Option<Balance>, GridError>;
    fn area(&mut self, user: UserId) -> Result<Option<AreaAggregate>, GridError>;
    /// Reserve the next entry sequence number.
    fn next_entry_seq(&mut self) -> Result<u64, GridError>;

    fn put_slot(&mut self, slot: Slot) -> Result<(), GridError>;
    fn put_deposit(&mut self, record: DepositRecord) -> Result<(), GridError>;
    fn put_entry(&mut self, entry: LedgerEntry) -> Result<(), GridError>;
    fn put_balance(&mut self, balance: Balance) -> Result<(), GridError>;
    fn put_area(&mut self, area: AreaAggregate) -> Result<(), GridError>;
    fn put_user_info(&mut self, info: UserInfo) -> Result<(), GridError>;
    fn put_referral(&mut self, referral: Referral) -> Result<(), GridError>;
    fn put_activation(&mut self, activation: ReferralActivation) -> Result<(), GridError>;
    fn put_rejection(&mut self, rejection: Rejection) -> Result<(), GridError>;
}

/// Apply every op of `batch` to `target`, stopping at the first failure.
pub fn apply_batch<T: ApplyTarget + ?Sized>(target: &mut T, batch: LedgerBatch) -> Result<(), GridError> {
    for op in batch.ops {
        apply_op(target, op)?;
    }
    Ok(())
}

fn apply_op<T: ApplyTarget + ?Sized>(target: &mut T, op: LedgerOp) -> Result<(), GridError> {
    match op {
        LedgerOp::CreateSlot(slot) => {
            let expected = target.next_slot_id()?;
            if slot.id != expected {
                return Err(ConflictError::SlotOutOfSequence { expected, got: slot.id }.into());
            }
            target.put_slot(slot)
        }
        LedgerOp::CreditSlot { id, amount, now } => {
            let mut slot = target.slot(id)?.ok_or(ConflictError::SlotNotFound(id))?;
            if !slot.is_running() {
                return Err(ConflictError::SlotNotRunning(id).into());
            }
            slot.credit(amount, now);
            target.put_slot(slot)
        }
        LedgerOp::ShiftAfter { stopped } => {
            let mut gap = target.slot(stopped)?.ok_or(ConflictError::SlotNotFound(stopped))?;
            if gap.is_running() || gap.compacted {
                return Ok(());
            }
            for mut later in target.slots_after(stopped)? {
                later.coord = later.coord.previous();
                target.put_slot(later)?;
            }
            gap.compacted = true;
            target.put_slot(gap)
        }
        LedgerOp::CreateDeposit(record) => {
            if target.deposit_exists(&record.hash)? {
                return Err(ConflictError::DuplicateHash(record.hash.to_string()).into());
            }
            target.put_deposit(record)
        }
        LedgerOp::AppendEntry(mut entry) => {
            entry.seq = target.next_entry_seq()?;
            if let (Some(user), true) = (entry.user, entry.amount > 0) {
                let mut balance = target.balance(user)?.unwrap_or(Balance { user, ..Balance::default() });
                balance.primary = balance.primary.saturating_add(entry.amount.unsigned_abs());
                target.put_balance(balance)?;
            }
            target.put_entry(entry)
        }
        LedgerOp::CreditBalance { user, primary, bonus } => {
            let mut balance = target.balance(user)?.unwrap_or(Balance { user, ..Balance::default() });
            balance.primary = balance.primary.saturating_add(primary);
            balance.bonus = balance.bonus.saturating_add(bonus);
            target.put_balance(balance)
        }
        LedgerOp::AddArea { user, self_delta, area_delta } => {
            let mut area = target.area(user)?.unwrap_or(AreaAggregate { user, ..AreaAggregate::default() });
            area.self_amount = area.self_amount.saturating_add(self_delta);
            area.area_amount = area.area_amount.saturating_add(area_delta);
            target.put_area(area)
        }
        LedgerOp::PutUserInfo(info) => target.put_user_info(info),
        LedgerOp::PutReferral(referral) => {
            if target.referral_exists(referral.user)? {
                return Err(ValidationError::AlreadyRegistered(referral.user).into());
            }
            referral.validate()?;
            target.put_referral(referral)
        }
        LedgerOp::RecordActivation(activation) => target.put_activation(activation),
        LedgerOp::PutRejection(rejection) => target.put_rejection(rejection),
    }
}
