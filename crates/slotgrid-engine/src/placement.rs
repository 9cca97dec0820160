//! Matrix placement: assigns the next grid coordinate to a new slot.
//!
//! The coordinate is derived from the ledger inside the event transaction on
//! every placement. Nothing about the grid is cached in memory.

use slotgrid_core::error::GridError;
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::tiers::TierSpec;
use slotgrid_core::types::{Coordinate, Slot, UserId};
use tracing::debug;

use crate::params::RewardParams;

/// A freshly placed slot and the overflow it inherited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub slot: Slot,
    /// Starting amount carried over from the user's previous slot.
    pub carried: u64,
}

/// Overflow of the user's last stopped slot, if it stopped within the grace
/// window, capped at `capacity`. The window ends before `stopped_at + grace`.
pub fn carry_over(
    tx: &StagedLedger<'_>,
    user: UserId,
    capacity: u64,
    params: &RewardParams,
    now: i64,
) -> Result<u64, GridError> {
    let Some(prev) = tx.last_user_stopped_slot(user)? else {
        return Ok(0);
    };
    let Some(stopped_at) = prev.stopped_at else {
        return Ok(0);
    };
    if now >= stopped_at.saturating_add(params.grace_secs()) {
        return Ok(0);
    }
    Ok(prev.carry_over().min(capacity))
}

/// Place a new slot for `user` at the next coordinate of the global sequence.
pub fn place_slot(
    tx: &mut StagedLedger<'_>,
    user: UserId,
    tier: &TierSpec,
    params: &RewardParams,
    now: i64,
) -> Result<Placement, GridError> {
    let coord = Coordinate::after(tx.last_running_slot()?.map(|s| s.coord));
    let carried = carry_over(tx, user, tier.capacity, params, now)?;
    let id = tx.next_slot_id()?;
    let slot = Slot::open(id, user, coord, tier.tier, carried, tier.capacity, now);
    tx.create_slot(slot.clone())?;
    debug!(slot = id, user, %coord, carried, "placed slot");
    Ok(Placement { slot, carried })
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgrid_core::memory::MemoryLedger;
    use slotgrid_core::tiers;
    use slotgrid_core::traits::LedgerStore;
    use slotgrid_core::types::SlotStatus;

    fn tier1() -> &'static TierSpec {
        tiers::by_tier(1).unwrap()
    }

    fn place(store: &MemoryLedger, user: UserId, params: &RewardParams, now: i64) -> Placement {
        let mut tx = StagedLedger::new(store);
        let p = place_slot(&mut tx, user, tier1(), params, now).unwrap();
        tx.commit().unwrap();
        p
    }

    fn stop(store: &MemoryLedger, id: u64, amount: u64, now: i64) {
        let mut tx = StagedLedger::new(store);
        tx.credit_slot(id, amount, now).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn first_slot_at_origin() {
        let store = MemoryLedger::new();
        let p = place(&store, 1, &RewardParams::default(), 0);
        assert_eq!(p.slot.id, 1);
        assert_eq!(p.slot.coord, Coordinate::ORIGIN);
        assert_eq!(p.slot.status, SlotStatus::Running);
        assert_eq!(p.slot.accumulated, 0);
        assert_eq!(p.carried, 0);
    }

    #[test]
    fn fills_rows_left_to_right() {
        let store = MemoryLedger::new();
        let params = RewardParams::default();
        let coords: Vec<(u64, u8)> = (1..=7)
            .map(|u| {
                let c = place(&store, u, &params, 0).slot.coord;
                (c.row, c.col)
            })
            .collect();
        assert_eq!(coords, vec![(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3), (3, 1)]);
    }

    #[test]
    fn follows_highest_running_slot() {
        let store = MemoryLedger::new();
        let params = RewardParams::default();
        for u in 1..=3 {
            place(&store, u, &params, 0);
        }
        stop(&store, 3, tier1().capacity, 10);
        let p = place(&store, 4, &params, 20);
        assert_eq!(p.slot.coord, Coordinate::new(1, 3));
    }

    #[test]
    fn carry_over_within_grace_window() {
        let store = MemoryLedger::new();
        let params = RewardParams { grace_minutes: 10, ..Default::default() };
        place(&store, 1, &params, 0);
        stop(&store, 1, tier1().capacity + 700, 1_000);

        let p = place(&store, 1, &params, 1_000 + 599);
        assert_eq!(p.carried, 700);
        assert_eq!(p.slot.accumulated, 700);
        assert!(p.slot.is_running());
    }

    #[test]
    fn carry_over_expires_after_grace_window() {
        let store = MemoryLedger::new();
        let params = RewardParams { grace_minutes: 10, ..Default::default() };
        place(&store, 1, &params, 0);
        stop(&store, 1, tier1().capacity + 700, 1_000);

        let p = place(&store, 1, &params, 1_000 + 600);
        assert_eq!(p.carried, 0);
    }

    #[test]
    fn carry_over_capped_at_capacity() {
        let store = MemoryLedger::new();
        let params = RewardParams { grace_minutes: 10, ..Default::default() };
        place(&store, 1, &params, 0);
        stop(&store, 1, 3 * tier1().capacity, 5);

        let mut tx = StagedLedger::new(&store);
        let carried = carry_over(&tx, 1, tier1().capacity, &params, 5).unwrap();
        assert_eq!(carried, tier1().capacity);
        let p = place_slot(&mut tx, 1, tier1(), &params, 5).unwrap();
        assert_eq!(p.slot.status, SlotStatus::Stop);
        assert!(store.get_slot(2).unwrap().is_none());
    }
}
