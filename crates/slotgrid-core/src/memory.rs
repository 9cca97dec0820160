//! In-memory ledger for tests and embedding.
//!
//! Everything lives behind one `parking_lot::Mutex`. [`LedgerStore::apply`]
//! runs a batch against a clone of the state and swaps it in only on success,
//! so a failed batch leaves nothing behind.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::apply::{ApplyTarget, apply_batch};
use crate::error::{GridError, LeaseError};
use crate::traits::{LedgerBatch, LedgerStore, is_near};
use crate::types::{
    AreaAggregate, Balance, DepositHash, DepositRecord, Lease, LedgerEntry, Referral,
    ReferralActivation, Rejection, Slot, SlotId, UserId, UserInfo,
};

#[derive(Clone, Debug, Default)]
struct Inner {
    slots: BTreeMap<SlotId, Slot>,
    deposits: HashMap<DepositHash, DepositRecord>,
    /// Append order, `seq` = index + 1.
    entries: Vec<LedgerEntry>,
    balances: HashMap<UserId, Balance>,
    areas: HashMap<UserId, AreaAggregate>,
    users: HashMap<UserId, UserInfo>,
    referrals: HashMap<UserId, Referral>,
    activations: Vec<ReferralActivation>,
    config: HashMap<String, i64>,
    rejections: HashMap<String, Rejection>,
    lease: Option<Lease>,
}

impl ApplyTarget for Inner {
    fn slot(&mut self, id: SlotId) -> Result<Option<Slot>, GridError> {
        Ok(self.slots.get(&id).cloned())
    }

    fn slots_after(&mut self, id: SlotId) -> Result<Vec<Slot>, GridError> {
        let Some(start) = id.checked_add(1) else {
            return Ok(Vec::new());
        };
        Ok(self.slots.range(start..).map(|(_, s)| s.clone()).collect())
    }

    fn next_slot_id(&mut self) -> Result<SlotId, GridError> {
        Ok(self.slots.keys().next_back().map_or(1, |id| id + 1))
    }

    fn deposit_exists(&mut self, hash: &DepositHash) -> Result<bool, GridError> {
        Ok(self.deposits.contains_key(hash))
    }

    fn referral_exists(&mut self, user: UserId) -> Result<bool, GridError> {
        Ok(self.referrals.contains_key(&user))
    }

    fn balance(&mut self, user: UserId) -> Result<Option<Balance>, GridError> {
        Ok(self.balances.get(&user).cloned())
    }

    fn area(&mut self, user: UserId) -> Result<Option<AreaAggregate>, GridError> {
        Ok(self.areas.get(&user).cloned())
    }

    fn next_entry_seq(&mut self) -> Result<u64, GridError> {
        Ok(self.entries.len() as u64 + 1)
    }

    fn put_slot(&mut self, slot: Slot) -> Result<(), GridError> {
        self.slots.insert(slot.id, slot);
        Ok(())
    }

    fn put_deposit(&mut self, record: DepositRecord) -> Result<(), GridError> {
        self.deposits.insert(record.hash.clone(), record);
        Ok(())
    }

    fn put_entry(&mut self, entry: LedgerEntry) -> Result<(), GridError> {
        self.entries.push(entry);
        Ok(())
    }

    fn put_balance(&mut self, balance: Balance) -> Result<(), GridError> {
        self.balances.insert(balance.user, balance);
        Ok(())
    }

    fn put_area(&mut self, area: AreaAggregate) -> Result<(), GridError> {
        self.areas.insert(area.user, area);
        Ok(())
    }

    fn put_user_info(&mut self, info: UserInfo) -> Result<(), GridError> {
        self.users.insert(info.user, info);
        Ok(())
    }

    fn put_referral(&mut self, referral: Referral) -> Result<(), GridError> {
        self.referrals.insert(referral.user, referral);
        Ok(())
    }

    fn put_activation(&mut self, activation: ReferralActivation) -> Result<(), GridError> {
        self.activations.push(activation);
        Ok(())
    }

    fn put_rejection(&mut self, rejection: Rejection) -> Result<(), GridError> {
        self.rejections.insert(rejection.hash.clone(), rejection);
        Ok(())
    }
}

/// Ledger held entirely in memory. No persistence.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ledger entry in append order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn deposit_count(&self) -> usize {
        self.inner.lock().deposits.len()
    }

    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Current lease row, if any.
    pub fn lease(&self) -> Option<Lease> {
        self.inner.lock().lease.clone()
    }
}

impl LedgerStore for MemoryLedger {
    fn get_slot(&self, id: SlotId) -> Result<Option<Slot>, GridError> {
        Ok(self.inner.lock().slots.get(&id).cloned())
    }

    fn last_running_slot(&self) -> Result<Option<Slot>, GridError> {
        Ok(self.inner.lock().slots.values().rev().find(|s| s.is_running()).cloned())
    }

    fn running_slots(&self) -> Result<Vec<Slot>, GridError> {
        Ok(self.inner.lock().slots.values().filter(|s| s.is_running()).cloned().collect())
    }

    fn user_slots(&self, user: UserId) -> Result<Vec<Slot>, GridError> {
        Ok(self.inner.lock().slots.values().filter(|s| s.user == user).cloned().collect())
    }

    fn slots_after(&self, id: SlotId) -> Result<Vec<Slot>, GridError> {
        self.inner.lock().slots_after(id)
    }

    fn slots_pending_recycle(&self) -> Result<Vec<Slot>, GridError> {
        Ok(self
            .inner
            .lock()
            .slots
            .values()
            .filter(|s| !s.is_running() && !s.compacted)
            .cloned()
            .collect())
    }

    fn running_slots_near(&self, row: u64, col: u8, span: u64) -> Result<Vec<Slot>, GridError> {
        Ok(self
            .inner
            .lock()
            .slots
            .values()
            .filter(|s| s.is_running() && is_near(s, row, col, span))
            .cloned()
            .collect())
    }

    fn next_slot_id(&self) -> Result<SlotId, GridError> {
        self.inner.lock().next_slot_id()
    }

    fn deposits_by_hash(
        &self,
        hashes: &[DepositHash],
    ) -> Result<HashMap<DepositHash, DepositRecord>, GridError> {
        let inner = self.inner.lock();
        Ok(hashes
            .iter()
            .filter_map(|h| inner.deposits.get(h).map(|r| (h.clone(), r.clone())))
            .collect())
    }

    fn referral(&self, user: UserId) -> Result<Option<Referral>, GridError> {
        Ok(self.inner.lock().referrals.get(&user).cloned())
    }

    fn user_info(&self, user: UserId) -> Result<Option<UserInfo>, GridError> {
        Ok(self.inner.lock().users.get(&user).cloned())
    }

    fn area(&self, user: UserId) -> Result<Option<AreaAggregate>, GridError> {
        Ok(self.inner.lock().areas.get(&user).cloned())
    }

    fn balance(&self, user: UserId) -> Result<Option<Balance>, GridError> {
        Ok(self.inner.lock().balances.get(&user).cloned())
    }

    fn entries_for_slot(&self, source: SlotId) -> Result<Vec<LedgerEntry>, GridError> {
        Ok(self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.source_slot == source)
            .cloned()
            .collect())
    }

    fn activations(&self, referrer: UserId) -> Result<Vec<ReferralActivation>, GridError> {
        Ok(self
            .inner
            .lock()
            .activations
            .iter()
            .filter(|a| a.referrer == referrer)
            .cloned()
            .collect())
    }

    fn rejection(&self, hash: &str) -> Result<Option<Rejection>, GridError> {
        Ok(self.inner.lock().rejections.get(hash).cloned())
    }

    fn config_values(&self, keys: &[&str]) -> Result<HashMap<String, i64>, GridError> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .filter_map(|k| inner.config.get(*k).map(|v| (k.to_string(), *v)))
            .collect())
    }

    fn set_config_value(&self, key: &str, value: i64) -> Result<(), GridError> {
        self.inner.lock().config.insert(key.to_string(), value);
        Ok(())
    }

    fn apply(&self, batch: LedgerBatch) -> Result<(), GridError> {
        let mut inner = self.inner.lock();
        let mut working = inner.clone();
        apply_batch(&mut working, batch)?;
        *inner = working;
        Ok(())
    }

    fn try_acquire_lease(&self, owner: &str, now: i64, ttl_secs: i64) -> Result<Lease, GridError> {
        let mut inner = self.inner.lock();
        if let Some(held) = &inner.lease {
            if held.owner != owner && !held.is_expired(now) {
                return Err(LeaseError::Held {
                    owner: held.owner.clone(),
                    expires_at: held.expires_at,
                }
                .into());
            }
        }
        let lease = Lease { owner: owner.to_string(), expires_at: now + ttl_secs };
        inner.lease = Some(lease.clone());
        Ok(lease)
    }

    fn release_lease(&self, owner: &str) -> Result<bool, GridError> {
        let mut inner = self.inner.lock();
        match &inner.lease {
            Some(held) if held.owner == owner => {
                inner.lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
