//! Reward distribution for one accepted deposit.
//!
//! Runs inside the event's [`StagedLedger`] after placement. Every step
//! credits running slots and reduces a signed `remaining`, initialised to the
//! distribution value. Whatever is left becomes the unattributed system entry,
//! so the distribution-kind entries of a deposit always sum to its value.
//!
//! The full requested amount is deducted even when the recipient slot absorbs
//! less than that before reaching capacity; the slot keeps the excess as
//! overflow.

use slotgrid_core::constants::{AREA_UNIT, COLUMN_REWARD_PCT, MAX_DEPTH_REWARD, ROW_REWARD_PCT};
use slotgrid_core::error::GridError;
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::tiers::TierSpec;
use slotgrid_core::types::{
    DepositHash, DepositRecord, EntryKind, LedgerEntry, MatrixAxis, ReferralActivation, Slot,
    SlotId, UserId, UserInfo,
};
use slotgrid_core::vip;
use tracing::debug;

use crate::params::{RewardParams, percent_of};
use crate::settings::MatrixMode;

/// Everything distribution needs to know about the deposit being applied.
#[derive(Debug, Clone)]
pub struct DepositContext<'c> {
    pub hash: DepositHash,
    pub user: UserId,
    pub coin: String,
    pub raw_amount: u128,
    pub kind: &'static str,
    pub tier: &'c TierSpec,
    /// Ancestor path of `user`, root first, direct referrer last.
    pub chain: &'c [UserId],
    /// Whether the new slot is the user's first ever.
    pub first_slot: bool,
    pub now: i64,
}

/// Result of distributing one deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Amount recorded as the system entry. Negative only under a
    /// misconfigured rate table.
    pub residual: i64,
    /// Slots that stopped because of this deposit.
    pub stopped: Vec<SlotId>,
    /// Whether the direct referrer's historical counter was incremented.
    pub activated: bool,
}

struct Distributor<'t, 'a, 'c> {
    tx: &'t mut StagedLedger<'a>,
    ctx: &'c DepositContext<'c>,
    params: &'c RewardParams,
    source: SlotId,
    remaining: i64,
    stopped: Vec<SlotId>,
}

impl Distributor<'_, '_, '_> {
    fn dv(&self) -> u64 {
        self.ctx.tier.distribution_value
    }

    /// Credit `amount` to `slot`, record the entry, and deduct it in full.
    /// Returns whether the slot is still running afterwards.
    fn pay(&mut self, slot: &Slot, kind: EntryKind, amount: u64) -> Result<bool, GridError> {
        if amount == 0 {
            return Ok(slot.is_running());
        }
        let outcome = self.tx.credit_slot(slot.id, amount, self.ctx.now)?;
        self.tx.append_entry(LedgerEntry {
            seq: 0,
            user: Some(slot.user),
            kind,
            amount: amount as i64,
            source_slot: self.source,
            target_slot: Some(slot.id),
            applied: outcome.applied,
            at: self.ctx.now,
        });
        self.remaining -= amount as i64;
        if outcome.stopped {
            self.stopped.push(slot.id);
        }
        debug!(
            slot = slot.id,
            user = slot.user,
            kind = kind.label(),
            amount,
            applied = outcome.applied,
            "credited"
        );
        Ok(!outcome.stopped)
    }

    /// Step 1: running siblings on the new slot's row or column.
    fn matrix(&mut self, new_slot: &Slot, mode: MatrixMode) -> Result<(), GridError> {
        let siblings =
            self.tx
                .running_slots_near(new_slot.coord.row, new_slot.coord.col, self.params.row_span)?;
        for sibling in siblings.iter().filter(|s| s.id != new_slot.id) {
            let axis = if sibling.coord.row == new_slot.coord.row {
                MatrixAxis::Row
            } else {
                MatrixAxis::Column
            };
            let pct = match (mode, axis) {
                (MatrixMode::RowAndColumn, MatrixAxis::Row) => ROW_REWARD_PCT,
                (MatrixMode::ColumnOnly, MatrixAxis::Row) => continue,
                (_, MatrixAxis::Column) => COLUMN_REWARD_PCT,
            };
            self.pay(sibling, EntryKind::Matrix(axis), percent_of(self.dv(), pct))?;
        }
        Ok(())
    }

    /// Steps 2 and 3: normal reward and VIP bonus for the direct referrer.
    ///
    /// Returns the waterfall baseline and whether the activation was counted.
    /// The baseline is the credited VIP tier and percentage, `(0, 0)` when no
    /// bonus was paid.
    fn referrer(&mut self, referrer: UserId) -> Result<((u8, u64), bool), GridError> {
        let mut info = self
            .tx
            .user_info(referrer)?
            .unwrap_or(UserInfo { user: referrer, ..UserInfo::default() });
        let mut activated = false;
        if self.ctx.first_slot {
            if vip::record_referral(&mut info) {
                debug!(user = referrer, vip = info.vip, "referrer tier raised");
            }
            self.tx.put_user_info(info.clone());
            self.tx.record_activation(ReferralActivation {
                referrer,
                referred: self.ctx.user,
                at: self.ctx.now,
            });
            activated = true;
        }

        let Some(slot) = self.tx.last_user_running_slot(referrer)? else {
            return Ok(((0, 0), activated));
        };
        let normal = percent_of(self.dv(), self.params.recommend_need);
        let still_running = self.pay(&slot, EntryKind::NormalRecommend, normal)?;

        if info.vip == 0 || !still_running {
            return Ok(((0, 0), activated));
        }
        let pct = self.params.vip_pct(info.vip);
        self.pay(&slot, EntryKind::Recommend, percent_of(self.dv(), pct))?;
        Ok(((info.vip, pct), activated))
    }

    /// Step 4: fixed-rate rewards for ancestors at depth 2..=6.
    fn depth(&mut self) -> Result<(), GridError> {
        let base = percent_of(self.dv(), self.params.recommend_need);
        let chain = self.ctx.chain;
        let ancestors = chain.iter().rev().copied().enumerate();
        for (depth, ancestor) in ancestors.map(|(i, a)| (i + 1, a)).skip(1).take(MAX_DEPTH_REWARD - 1) {
            let amount = percent_of(base, self.params.depth_pct(depth));
            if amount == 0 {
                continue;
            }
            if let Some(slot) = self.tx.last_user_running_slot(ancestor)? {
                self.pay(&slot, EntryKind::DepthRecommend(depth as u8), amount)?;
            }
        }
        Ok(())
    }

    /// Step 5: incremental VIP rates up the chain above the referrer,
    /// starting from the tier and percentage the referrer was credited.
    fn waterfall(&mut self, (mut last_tier, mut last_pct): (u8, u64)) -> Result<(), GridError> {
        let chain = self.ctx.chain;
        for &ancestor in chain.iter().rev().skip(1) {
            let tier = self.tx.user_info(ancestor)?.map_or(0, |i| i.vip);
            if tier <= last_tier {
                break;
            }
            let Some(slot) = self.tx.last_user_running_slot(ancestor)? else {
                break;
            };
            let pct = self.params.vip_pct(tier);
            let amount = percent_of(self.dv(), pct.saturating_sub(last_pct));
            self.pay(&slot, EntryKind::RecommendTop(tier), amount)?;
            last_tier = tier;
            last_pct = last_pct.max(pct);
        }
        Ok(())
    }

    /// Step 6: area aggregates for the depositor and every ancestor.
    fn area(&mut self) {
        let units = self.dv() / AREA_UNIT;
        self.tx.add_area(self.ctx.user, units, 0);
        for &ancestor in self.ctx.chain {
            self.tx.add_area(ancestor, 0, units);
        }
    }

    /// Step 7: deposit record, system residual, depositor credit.
    fn finalize(&mut self, new_slot: &Slot, carried: u64) -> Result<(), GridError> {
        let ctx = self.ctx;
        self.tx.create_deposit(DepositRecord {
            hash: ctx.hash.clone(),
            user: ctx.user,
            coin: ctx.coin.clone(),
            amount: ctx.raw_amount,
            status: "processed".to_string(),
            kind: ctx.kind.to_string(),
            slot: new_slot.id,
            recorded_at: ctx.now,
        })?;
        let entry = |user: Option<UserId>, kind: EntryKind, amount: i64| LedgerEntry {
            seq: 0,
            user,
            kind,
            amount,
            source_slot: new_slot.id,
            target_slot: None,
            applied: 0,
            at: ctx.now,
        };
        self.tx.append_entry(entry(None, EntryKind::System, self.remaining));
        self.tx.append_entry(entry(Some(ctx.user), EntryKind::Deposit, self.dv() as i64));
        self.tx.credit_balance(ctx.user, 0, ctx.tier.bonus);
        let carried = carried.min(new_slot.capacity);
        if carried > 0 {
            self.tx.append_entry(entry(Some(ctx.user), EntryKind::DepositCarryOver, carried as i64));
        }
        Ok(())
    }
}

/// Apply the matrix, referral, depth, waterfall and area rewards of one
/// deposit and record it as processed.
pub fn distribute(
    tx: &mut StagedLedger<'_>,
    ctx: &DepositContext<'_>,
    new_slot: &Slot,
    carried: u64,
    params: &RewardParams,
    mode: MatrixMode,
) -> Result<Distribution, GridError> {
    let mut d = Distributor {
        tx,
        ctx,
        params,
        source: new_slot.id,
        remaining: ctx.tier.distribution_value as i64,
        stopped: Vec::new(),
    };

    d.matrix(new_slot, mode)?;

    let mut activated = false;
    if let Some(&referrer) = ctx.chain.last() {
        let (baseline, counted) = d.referrer(referrer)?;
        activated = counted;
        d.depth()?;
        d.waterfall(baseline)?;
    }

    d.area();
    d.finalize(new_slot, carried)?;

    Ok(Distribution { residual: d.remaining, stopped: d.stopped, activated })
}
