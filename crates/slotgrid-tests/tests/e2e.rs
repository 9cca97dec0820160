//! End-to-end scenarios through the engine.
//!
//! Amounts are worked by hand from the tier table: tier 1 has capacity
//! 5,000,000,000,000 and distribution value 1,000,000,000,000; tier 3 has
//! distribution value 5,000,000,000,000.

use std::sync::Arc;

use slotgrid_core::error::{ConflictError, GridError, ValidationError};
use slotgrid_core::memory::MemoryLedger;
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::traits::{LedgerStore, ManualClock};
use slotgrid_core::types::{Coordinate, EntryKind, LedgerEntry, MatrixAxis, SlotId, SlotStatus, UserId};
use slotgrid_engine::{Engine, MatrixMode};
use slotgrid_node::RocksLedger;
use slotgrid_tests::helpers::*;

const DV1: i64 = 1_000_000_000_000;
const DV3: i64 = 5_000_000_000_000;

fn entries_of(store: &dyn LedgerStore, slot: SlotId, kind: EntryKind) -> Vec<(Option<UserId>, i64)> {
    store
        .entries_for_slot(slot)
        .unwrap()
        .into_iter()
        .filter(|e: &LedgerEntry| e.kind == kind)
        .map(|e| (e.user, e.amount))
        .collect()
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

#[test]
fn first_deposit_in_empty_grid() {
    let (engine, store, _) = memory_engine(MatrixMode::RowAndColumn, 100);
    engine.register(1, None).unwrap();

    let report = engine.process_batch(&[event(1, 1, 1)]).unwrap();
    assert_eq!(report.processed, 1);

    let slot = store.get_slot(1).unwrap().unwrap();
    assert_eq!(slot.coord, Coordinate::new(1, 1));
    assert_eq!(slot.status, SlotStatus::Running);
    assert_eq!(slot.accumulated, 0);
    assert_eq!(slot.capacity, 5_000_000_000_000);

    assert!(entries_of(store.as_ref(), 1, EntryKind::Matrix(MatrixAxis::Row)).is_empty());
    assert!(entries_of(store.as_ref(), 1, EntryKind::Matrix(MatrixAxis::Column)).is_empty());
    assert!(entries_of(store.as_ref(), 1, EntryKind::NormalRecommend).is_empty());
    assert_eq!(entries_of(store.as_ref(), 1, EntryKind::System), vec![(None, DV1)]);
    assert_eq!(entries_of(store.as_ref(), 1, EntryKind::Deposit), vec![(Some(1), DV1)]);

    let balance = store.balance(1).unwrap().unwrap();
    assert_eq!(balance.primary, DV1 as u64);
    assert_eq!(balance.bonus, 1_000_000_000_000);
    assert_eq!(store.area(1).unwrap().unwrap().self_amount, 100);
}

#[test]
fn row_siblings_then_wrap() {
    let (engine, store, _) = memory_engine(MatrixMode::RowAndColumn, 0);
    register_tree(&engine, &[None; 4]);
    engine
        .process_batch(&[event(1, 1, 1), event(2, 2, 1), event(3, 3, 1), event(4, 4, 1)])
        .unwrap();

    let coords: Vec<Coordinate> = all_slots(store.as_ref()).iter().map(|s| s.coord).collect();
    assert_eq!(
        coords,
        vec![Coordinate::new(1, 1), Coordinate::new(1, 2), Coordinate::new(1, 3), Coordinate::new(2, 1)]
    );
    // The third slot shares row 1 with the first two: 5% each.
    assert_eq!(
        entries_of(store.as_ref(), 3, EntryKind::Matrix(MatrixAxis::Row)),
        vec![(Some(1), DV1 / 20), (Some(2), DV1 / 20)]
    );
    assert_eq!(distribution_sum(store.as_ref(), 3), DV1);
}

// ---------------------------------------------------------------------------
// Capacity, recycling, carry-over
// ---------------------------------------------------------------------------

/// User 1 holds slot 1 at 4.9e12 of 5e12; user 2 (referred by 1) deposits
/// tier 3 with a 10% referrer rate.
fn near_full_referrer(grace_minutes: i64) -> (Engine, Arc<MemoryLedger>, Arc<ManualClock>) {
    let (engine, store, clock) = memory_engine(MatrixMode::ColumnOnly, 1_000);
    register_tree(&engine, &[None, Some(1)]);
    set_rates(store.as_ref(), 10, [0; 5], [0; 5]);
    store.set_config_value("time_again", grace_minutes).unwrap();

    engine.process_batch(&[event(1, 1, 1)]).unwrap();
    let mut tx = StagedLedger::new(store.as_ref());
    tx.credit_slot(1, 4_900_000_000_000, 1_000).unwrap();
    tx.commit().unwrap();

    clock.set(2_000);
    engine.process_batch(&[event(2, 2, 3)]).unwrap();
    (engine, store, clock)
}

#[test]
fn credit_past_capacity_deducted_in_full() {
    let (_, store, _) = near_full_referrer(0);

    let slot = store.get_slot(1).unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Stop);
    assert_eq!(slot.stopped_at, Some(2_000));
    assert_eq!(slot.accumulated, slot.capacity);
    assert_eq!(slot.overflow, 400_000_000_000);

    let entries = store.entries_for_slot(2).unwrap();
    let referrer = entries.iter().find(|e| e.kind == EntryKind::NormalRecommend).unwrap();
    assert_eq!(referrer.amount, 500_000_000_000);
    assert_eq!(referrer.applied, 100_000_000_000);
    assert_eq!(entries_of(store.as_ref(), 2, EntryKind::System), vec![(None, DV3 - 500_000_000_000)]);
    assert_eq!(distribution_sum(store.as_ref(), 2), DV3);
    assert_eq!(store.user_info(1).unwrap().unwrap().history_referrals, 1);
}

#[test]
fn stopped_slot_compacted_out_of_sequence() {
    let (engine, store, _) = near_full_referrer(0);

    // Slot 2 moved into the gap left by slot 1 at the end of the batch.
    assert!(store.get_slot(1).unwrap().unwrap().compacted);
    assert_eq!(store.get_slot(2).unwrap().unwrap().coord, Coordinate::new(1, 1));
    assert_eq!(engine.compact().unwrap().compacted, 0);
}

#[test]
fn overflow_carries_over_within_grace() {
    let (engine, store, clock) = near_full_referrer(30);
    clock.advance(29 * 60);

    engine.process_batch(&[event(1, 3, 1)]).unwrap();
    let slot = store.last_user_slot(1).unwrap().unwrap();
    assert_eq!(slot.id, 3);
    assert_eq!(slot.coord, Coordinate::new(1, 2));
    assert_eq!(slot.accumulated, 400_000_000_000);
    assert_eq!(
        entries_of(store.as_ref(), 3, EntryKind::DepositCarryOver),
        vec![(Some(1), 400_000_000_000)]
    );
}

#[test]
fn overflow_lost_after_grace() {
    let (engine, store, clock) = near_full_referrer(30);
    clock.advance(31 * 60);

    engine.process_batch(&[event(1, 3, 1)]).unwrap();
    let slot = store.last_user_slot(1).unwrap().unwrap();
    assert_eq!(slot.accumulated, 0);
    assert!(entries_of(store.as_ref(), 3, EntryKind::DepositCarryOver).is_empty());
}

// ---------------------------------------------------------------------------
// Referral rewards
// ---------------------------------------------------------------------------

#[test]
fn second_activation_promotes_referrer_and_pays_vip_bonus() {
    let (engine, store, _) = memory_engine(MatrixMode::ColumnOnly, 0);
    register_tree(&engine, &[None, Some(1), Some(1)]);
    set_rates(store.as_ref(), 10, [0; 5], [3, 0, 0, 0, 0]);

    engine.process_batch(&[event(1, 1, 1), event(2, 2, 1)]).unwrap();
    assert_eq!(store.user_info(1).unwrap().unwrap().vip, 0);
    assert!(entries_of(store.as_ref(), 2, EntryKind::Recommend).is_empty());

    engine.process_batch(&[event(3, 3, 1)]).unwrap();
    let info = store.user_info(1).unwrap().unwrap();
    assert_eq!(info.history_referrals, 2);
    assert_eq!(info.vip, 1);
    assert_eq!(entries_of(store.as_ref(), 3, EntryKind::Recommend), vec![(Some(1), DV1 * 3 / 100)]);
    assert_eq!(store.activations(1).unwrap().len(), 2);

    let forced = engine.force_tier(1, 4).unwrap();
    assert_eq!(forced.vip, 4);
    assert_eq!(forced.history_referrals, 8);
}

#[test]
fn depth_and_waterfall_rewards_up_the_chain() {
    let (engine, store, _) = memory_engine(MatrixMode::RowAndColumn, 0);
    register_tree(&engine, &[None, Some(1), Some(2), Some(3)]);
    set_rates(store.as_ref(), 10, [50, 20, 0, 0, 0], [1, 2, 3, 4, 5]);
    engine.force_tier(1, 3).unwrap();
    engine.force_tier(2, 1).unwrap();

    engine
        .process_batch(&[event(1, 1, 1), event(2, 2, 1), event(3, 3, 1)])
        .unwrap();
    // Slot 4 lands at (2,1): no row siblings, and row 1 is outside a zero span.
    engine.process_batch(&[event(4, 4, 1)]).unwrap();
    assert_eq!(store.get_slot(4).unwrap().unwrap().coord, Coordinate::new(2, 1));

    let normal = DV1 / 10;
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::NormalRecommend), vec![(Some(3), normal)]);
    assert!(entries_of(store.as_ref(), 4, EntryKind::Recommend).is_empty());
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::DepthRecommend(2)), vec![(Some(2), normal / 2)]);
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::DepthRecommend(3)), vec![(Some(1), normal / 5)]);
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::RecommendTop(1)), vec![(Some(2), DV1 / 100)]);
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::RecommendTop(3)), vec![(Some(1), DV1 * 2 / 100)]);

    let paid = normal + normal / 2 + normal / 5 + DV1 / 100 + DV1 * 2 / 100;
    assert_eq!(entries_of(store.as_ref(), 4, EntryKind::System), vec![(None, DV1 - paid)]);
    assert_eq!(store.area(1).unwrap().unwrap().area_amount, 300);
}

// ---------------------------------------------------------------------------
// Operator entry
// ---------------------------------------------------------------------------

#[test]
fn operator_entry_errors_are_synchronous() {
    let (engine, store, _) = memory_engine(MatrixMode::RowAndColumn, 0);
    register_tree(&engine, &[None, None]);

    let applied = engine.insert_manual(1, 50, "ticket-1").unwrap();
    assert_eq!(applied.slot.tier, 1);
    assert_eq!(applied.distribution.residual, DV1);

    let err = engine.insert_manual(1, 50, "ticket-2").unwrap_err();
    assert!(matches!(err, GridError::Validation(ValidationError::SlotAlreadyRunning(1))));

    let err = engine.insert_manual(2, 100, "ticket-1").unwrap_err();
    assert!(matches!(err, GridError::Conflict(ConflictError::DuplicateHash(_))));

    let err = engine.insert_manual(2, 70, "ticket-3").unwrap_err();
    assert!(matches!(err, GridError::Validation(ValidationError::UnmappedAmount(_))));

    let err = engine.insert_manual(9, 50, "ticket-4").unwrap_err();
    assert!(matches!(err, GridError::Validation(ValidationError::UnknownUser(9))));

    assert_eq!(store.slot_count(), 1);
}

// ---------------------------------------------------------------------------
// On-disk ledger
// ---------------------------------------------------------------------------

#[test]
fn rocks_and_memory_ledgers_agree() {
    let dir = tempfile::tempdir().unwrap();
    let rocks = Arc::new(RocksLedger::open(dir.path().join("ledger")).unwrap());
    let rocks_engine = Engine::new(rocks.clone(), Arc::new(ManualClock::new(0)), settings(MatrixMode::RowAndColumn));
    let (mem_engine, mem, _) = memory_engine(MatrixMode::RowAndColumn, 0);

    let parents = [None, Some(1), Some(2), Some(1), Some(4)];
    let batch = [event(1, 1, 1), event(2, 2, 2), event(3, 3, 3), event(4, 4, 1), event(5, 5, 2)];
    let runs: [(&Engine, &dyn LedgerStore); 2] = [(&rocks_engine, rocks.as_ref()), (&mem_engine, mem.as_ref())];
    for (engine, store) in runs {
        register_tree(engine, &parents);
        set_rates(store, 10, [5, 4, 3, 2, 1], [1, 2, 3, 4, 5]);
        store.set_config_value("location_row", 1).unwrap();
        engine.process_batch(&batch).unwrap();
    }

    assert_eq!(all_slots(rocks.as_ref()), all_slots(mem.as_ref()));
    for id in 1..=5 {
        assert_eq!(rocks.entries_for_slot(id).unwrap(), mem.entries_for_slot(id).unwrap());
    }
    for user in 1..=5 {
        assert_eq!(rocks.balance(user).unwrap(), mem.balance(user).unwrap());
        assert_eq!(rocks.area(user).unwrap(), mem.area(user).unwrap());
        assert_eq!(rocks.user_info(user).unwrap(), mem.user_info(user).unwrap());
    }
}
