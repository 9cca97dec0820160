//! Staged transaction over a [`LedgerStore`].
//!
//! A [`StagedLedger`] records mutations in a [`LedgerBatch`] while keeping an
//! overlay of the state they produce, so later reads in the same event see
//! earlier writes. Nothing reaches the store until [`StagedLedger::commit`];
//! dropping the value discards the event.
//!
//! Slot guards are checked twice: here against the overlay, and again by the
//! store at commit (a slot stopped by a concurrent writer fails the commit
//! with [`ConflictError::SlotNotRunning`]).

use std::collections::{BTreeMap, HashMap};

use crate::error::{ConflictError, GridError, ValidationError};
use crate::traits::{LedgerBatch, LedgerOp, LedgerStore, is_near};
use crate::types::{
    AreaAggregate, Balance, CreditOutcome, DepositHash, DepositRecord, LedgerEntry, Referral,
    ReferralActivation, Rejection, Slot, SlotId, UserId, UserInfo,
};

pub struct StagedLedger<'a> {
    store: &'a dyn LedgerStore,
    batch: LedgerBatch,
    /// Slots created or modified by this transaction.
    slots: BTreeMap<SlotId, Slot>,
    next_slot: Option<SlotId>,
    deposits: HashMap<DepositHash, DepositRecord>,
    users: HashMap<UserId, UserInfo>,
    referrals: HashMap<UserId, Referral>,
    /// `(primary, bonus)` credits not yet committed.
    balance_deltas: HashMap<UserId, (u64, u64)>,
    /// `(self, area)` increments not yet committed.
    area_deltas: HashMap<UserId, (u64, u64)>,
    entries: Vec<LedgerEntry>,
}

impl<'a> StagedLedger<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self {
            store,
            batch: LedgerBatch::new(),
            slots: BTreeMap::new(),
            next_slot: None,
            deposits: HashMap::new(),
            users: HashMap::new(),
            referrals: HashMap::new(),
            balance_deltas: HashMap::new(),
            area_deltas: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn store(&self) -> &'a dyn LedgerStore {
        self.store
    }

    /// Committed slots matching `keep`, with this transaction's slots
    /// substituted and re-filtered.
    fn merge(&self, committed: Vec<Slot>, keep: impl Fn(&Slot) -> bool) -> Vec<Slot> {
        let mut out: BTreeMap<SlotId, Slot> = committed
            .into_iter()
            .filter(|s| !self.slots.contains_key(&s.id))
            .map(|s| (s.id, s))
            .collect();
        for slot in self.slots.values().filter(|s| keep(s)) {
            out.insert(slot.id, slot.clone());
        }
        out.into_values().collect()
    }

    // --- reads ---

    pub fn get_slot(&self, id: SlotId) -> Result<Option<Slot>, GridError> {
        match self.slots.get(&id) {
            Some(slot) => Ok(Some(slot.clone())),
            None => self.store.get_slot(id),
        }
    }

    pub fn last_running_slot(&self) -> Result<Option<Slot>, GridError> {
        let staged_best = self.slots.values().rev().find(|s| s.is_running()).cloned();
        match self.store.last_running_slot()? {
            Some(committed) if self.slots.contains_key(&committed.id) => {
                Ok(self.merge(self.store.running_slots()?, Slot::is_running).pop())
            }
            Some(committed) => Ok(match staged_best {
                Some(s) if s.id > committed.id => Some(s),
                _ => Some(committed),
            }),
            None => Ok(staged_best),
        }
    }

    pub fn user_slots(&self, user: UserId) -> Result<Vec<Slot>, GridError> {
        Ok(self.merge(self.store.user_slots(user)?, |s| s.user == user))
    }

    pub fn last_user_running_slot(&self, user: UserId) -> Result<Option<Slot>, GridError> {
        Ok(self.user_slots(user)?.into_iter().rev().find(Slot::is_running))
    }

    pub fn last_user_stopped_slot(&self, user: UserId) -> Result<Option<Slot>, GridError> {
        Ok(self.user_slots(user)?.into_iter().rev().find(|s| !s.is_running()))
    }

    pub fn has_running_slot(&self, user: UserId) -> Result<bool, GridError> {
        Ok(self.last_user_running_slot(user)?.is_some())
    }

    pub fn running_slots_near(&self, row: u64, col: u8, span: u64) -> Result<Vec<Slot>, GridError> {
        Ok(self.merge(self.store.running_slots_near(row, col, span)?, |s| {
            s.is_running() && is_near(s, row, col, span)
        }))
    }

    pub fn next_slot_id(&mut self) -> Result<SlotId, GridError> {
        match self.next_slot {
            Some(id) => Ok(id),
            None => {
                let id = self.store.next_slot_id()?;
                self.next_slot = Some(id);
                Ok(id)
            }
        }
    }

    pub fn deposit_known(&self, hash: &DepositHash) -> Result<bool, GridError> {
        if self.deposits.contains_key(hash) {
            return Ok(true);
        }
        Ok(!self.store.deposits_by_hash(std::slice::from_ref(hash))?.is_empty())
    }

    pub fn referral(&self, user: UserId) -> Result<Option<Referral>, GridError> {
        match self.referrals.get(&user) {
            Some(r) => Ok(Some(r.clone())),
            None => self.store.referral(user),
        }
    }

    pub fn user_info(&self, user: UserId) -> Result<Option<UserInfo>, GridError> {
        match self.users.get(&user) {
            Some(info) => Ok(Some(info.clone())),
            None => self.store.user_info(user),
        }
    }

    pub fn balance(&self, user: UserId) -> Result<Balance, GridError> {
        let mut balance = self.store.balance(user)?.unwrap_or(Balance { user, ..Balance::default() });
        if let Some((primary, bonus)) = self.balance_deltas.get(&user) {
            balance.primary += primary;
            balance.bonus += bonus;
        }
        Ok(balance)
    }

    pub fn area(&self, user: UserId) -> Result<AreaAggregate, GridError> {
        let mut area = self.store.area(user)?.unwrap_or(AreaAggregate { user, ..AreaAggregate::default() });
        if let Some((own, below)) = self.area_deltas.get(&user) {
            area.self_amount += own;
            area.area_amount += below;
        }
        Ok(area)
    }

    /// Entries appended by this transaction, `seq` not yet assigned.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn op_count(&self) -> usize {
        self.batch.len()
    }

    // --- writes ---

    pub fn create_slot(&mut self, slot: Slot) -> Result<(), GridError> {
        let expected = self.next_slot_id()?;
        if slot.id != expected {
            return Err(ConflictError::SlotOutOfSequence { expected, got: slot.id }.into());
        }
        self.next_slot = Some(expected + 1);
        self.slots.insert(slot.id, slot.clone());
        self.batch.push(LedgerOp::CreateSlot(slot));
        Ok(())
    }

    /// Credit a running slot.
    pub fn credit_slot(&mut self, id: SlotId, amount: u64, now: i64) -> Result<CreditOutcome, GridError> {
        let mut slot = self.get_slot(id)?.ok_or(ConflictError::SlotNotFound(id))?;
        if !slot.is_running() {
            return Err(ConflictError::SlotNotRunning(id).into());
        }
        let outcome = slot.credit(amount, now);
        self.slots.insert(id, slot);
        self.batch.push(LedgerOp::CreditSlot { id, amount, now });
        Ok(outcome)
    }

    /// Shift every slot after `stopped` back one position and mark the gap
    /// compacted. Returns the number of slots moved, 0 if nothing to do.
    pub fn shift_after(&mut self, stopped: SlotId) -> Result<usize, GridError> {
        let mut gap = self.get_slot(stopped)?.ok_or(ConflictError::SlotNotFound(stopped))?;
        if gap.is_running() || gap.compacted {
            return Ok(0);
        }
        let later = self.merge(self.store.slots_after(stopped)?, |s| s.id > stopped);
        let moved = later.len();
        for mut slot in later {
            slot.coord = slot.coord.previous();
            self.slots.insert(slot.id, slot);
        }
        gap.compacted = true;
        self.slots.insert(stopped, gap);
        self.batch.push(LedgerOp::ShiftAfter { stopped });
        Ok(moved)
    }

    pub fn create_deposit(&mut self, record: DepositRecord) -> Result<(), GridError> {
        if self.deposit_known(&record.hash)? {
            return Err(ConflictError::DuplicateHash(record.hash.to_string()).into());
        }
        self.deposits.insert(record.hash.clone(), record.clone());
        self.batch.push(LedgerOp::CreateDeposit(record));
        Ok(())
    }

    pub fn append_entry(&mut self, entry: LedgerEntry) {
        if let (Some(user), true) = (entry.user, entry.amount > 0) {
            self.balance_deltas.entry(user).or_default().0 += entry.amount.unsigned_abs();
        }
        self.entries.push(entry.clone());
        self.batch.push(LedgerOp::AppendEntry(entry));
    }

    pub fn credit_balance(&mut self, user: UserId, primary: u64, bonus: u64) {
        let delta = self.balance_deltas.entry(user).or_default();
        delta.0 += primary;
        delta.1 += bonus;
        self.batch.push(LedgerOp::CreditBalance { user, primary, bonus });
    }

    pub fn add_area(&mut self, user: UserId, self_delta: u64, area_delta: u64) {
        let delta = self.area_deltas.entry(user).or_default();
        delta.0 += self_delta;
        delta.1 += area_delta;
        self.batch.push(LedgerOp::AddArea { user, self_delta, area_delta });
    }

    pub fn put_user_info(&mut self, info: UserInfo) {
        self.users.insert(info.user, info.clone());
        self.batch.push(LedgerOp::PutUserInfo(info));
    }

    pub fn put_referral(&mut self, referral: Referral) -> Result<(), GridError> {
        if self.referral(referral.user)?.is_some() {
            return Err(ValidationError::AlreadyRegistered(referral.user).into());
        }
        referral.validate()?;
        self.referrals.insert(referral.user, referral.clone());
        self.batch.push(LedgerOp::PutReferral(referral));
        Ok(())
    }

    pub fn record_activation(&mut self, activation: ReferralActivation) {
        self.batch.push(LedgerOp::RecordActivation(activation));
    }

    pub fn put_rejection(&mut self, rejection: Rejection) {
        self.batch.push(LedgerOp::PutRejection(rejection));
    }

    /// Apply the staged batch atomically.
    pub fn commit(self) -> Result<(), GridError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.store.apply(self.batch)
    }

    pub fn into_batch(self) -> LedgerBatch {
        self.batch
    }
}
