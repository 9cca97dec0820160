//! Shared test helpers for property and E2E tests.

use std::sync::Arc;

use slotgrid_core::constants::{KEY_RECOMMEND_NEED, KEY_RECOMMEND_NEED_DEPTH, KEY_RECOMMEND_NEED_VIP};
use slotgrid_core::memory::MemoryLedger;
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::tiers;
use slotgrid_core::traits::{LedgerStore, ManualClock};
use slotgrid_core::types::{DepositEvent, Slot, SlotId, UserId};
use slotgrid_engine::{Engine, EngineSettings, LeaseSettings, MatrixMode};

/// Raw deposit amounts of tiers 1, 2 and 3.
pub const TIER_RAW: [u128; 3] = [
    100_000_000_000_000_000_000,
    300_000_000_000_000_000_000,
    500_000_000_000_000_000_000,
];

/// Engine settings with no lease backoff, so a held lease never sleeps.
pub fn settings(mode: MatrixMode) -> EngineSettings {
    EngineSettings {
        matrix_mode: mode,
        lease: LeaseSettings { backoff_ms: 0, retries: 1, ..LeaseSettings::default() },
        validation_attempt_limit: None,
    }
}

/// An engine over a fresh in-memory ledger with a manual clock at `now`.
pub fn memory_engine(mode: MatrixMode, now: i64) -> (Engine, Arc<MemoryLedger>, Arc<ManualClock>) {
    let store = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::new(now));
    let engine = Engine::new(store.clone(), clock.clone(), settings(mode));
    (engine, store, clock)
}

/// A deposit event with a hash derived from `nonce`.
pub fn event(user: UserId, nonce: u64, tier: u8) -> DepositEvent {
    DepositEvent {
        user,
        hash: format!("0x{nonce:064x}"),
        coin: "USDT".into(),
        amount: TIER_RAW[usize::from(tier - 1)],
    }
}

/// Register users `1..=parents.len()`; `parents[i]` is the referrer of user `i + 1`.
pub fn register_tree(engine: &Engine, parents: &[Option<UserId>]) {
    for (i, parent) in parents.iter().enumerate() {
        engine.register(i as UserId + 1, *parent).unwrap();
    }
}

/// Write the referrer, depth and VIP rates.
pub fn set_rates(store: &dyn LedgerStore, recommend_need: i64, depth: [i64; 5], vip: [i64; 5]) {
    store.set_config_value(KEY_RECOMMEND_NEED, recommend_need).unwrap();
    for (key, value) in KEY_RECOMMEND_NEED_DEPTH.iter().zip(depth) {
        store.set_config_value(key, value).unwrap();
    }
    for (key, value) in KEY_RECOMMEND_NEED_VIP.iter().zip(vip) {
        store.set_config_value(key, value).unwrap();
    }
}

/// Every slot in id order.
pub fn all_slots(store: &dyn LedgerStore) -> Vec<Slot> {
    store.slots_after(0).unwrap()
}

/// Sum of the distribution entries sourced from `slot`, system residual included.
pub fn distribution_sum(store: &dyn LedgerStore, slot: SlotId) -> i64 {
    store
        .entries_for_slot(slot)
        .unwrap()
        .iter()
        .filter(|e| e.kind.is_distribution())
        .map(|e| e.amount)
        .sum()
}

/// Distribution value of the tier `slot` was opened with.
pub fn distribution_value(slot: &Slot) -> i64 {
    tiers::by_tier(slot.tier).unwrap().distribution_value as i64
}

/// Credit slot `id` up to its capacity plus `extra`, stopping it.
pub fn fill_slot(store: &dyn LedgerStore, id: SlotId, extra: u64, now: i64) {
    let slot = store.get_slot(id).unwrap().unwrap();
    let mut tx = StagedLedger::new(store);
    tx.credit_slot(id, slot.headroom() + extra, now).unwrap();
    tx.commit().unwrap();
}
