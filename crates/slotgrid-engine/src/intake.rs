//! Deposit intake: drives placement and distribution for external deposit
//! events and operator entries.
//!
//! Events of a batch are applied strictly in order, each in its own
//! transaction. A failing event is logged and skipped; its hash is not
//! recorded, so the next batch retries it.

use std::collections::HashSet;
use std::sync::Arc;

use slotgrid_core::constants::OPERATOR_COIN;
use slotgrid_core::error::{ConflictError, GridError, ValidationError};
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::tiers::{self, TierSpec};
use slotgrid_core::traits::{Clock, LedgerStore, SystemClock};
use slotgrid_core::types::{DepositEvent, DepositHash, Rejection, Slot, UserId, UserInfo};
use slotgrid_core::vip;
use tracing::{debug, info, warn};

use crate::distribution::{DepositContext, Distribution, distribute};
use crate::lock;
use crate::params::RewardParams;
use crate::placement::place_slot;
use crate::recycler::{self, CompactionReport};
use crate::registry;
use crate::settings::EngineSettings;

/// Counters for one [`Engine::process_batch`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub processed: usize,
    /// Hash already recorded by an earlier batch.
    pub known: usize,
    /// Hash repeated within this batch.
    pub duplicates: usize,
    /// User still holds a running slot.
    pub busy: usize,
    pub rejected: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Skipped because the hash was dead-lettered earlier.
    pub dead_lettered: usize,
    pub compacted: usize,
    /// Whether the batch ran under the advisory lease.
    pub leased: bool,
}

/// A placed and distributed deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub slot: Slot,
    pub carried: u64,
    pub distribution: Distribution,
}

/// A validated deposit about to be applied.
struct PendingDeposit<'s> {
    hash: DepositHash,
    user: UserId,
    coin: String,
    raw_amount: u128,
    tier: &'s TierSpec,
    kind: &'static str,
}

enum EventOutcome {
    Applied(Box<Applied>),
    DeadLettered,
    Busy,
}

pub struct Engine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self { store, clock, settings }
    }

    pub fn with_system_clock(store: Arc<dyn LedgerStore>, settings: EngineSettings) -> Self {
        Self::new(store, Arc::new(SystemClock), settings)
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Apply a batch of external deposit events in order.
    ///
    /// Only failures to load the batch's parameters or look up its hashes
    /// abort the batch; per-event failures are counted and skipped.
    pub fn process_batch(&self, events: &[DepositEvent]) -> Result<BatchReport, GridError> {
        let store = self.store();
        let mut lease = lock::acquire(store, self.clock.as_ref(), &self.settings.lease);
        let mut report = BatchReport {
            received: events.len(),
            leased: lease.is_some(),
            ..BatchReport::default()
        };

        let params = RewardParams::load(store)?;

        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(events.len());
        for ev in events {
            match DepositHash::parse(&ev.hash) {
                Ok(hash) if seen.insert(hash.clone()) => pending.push((hash, ev)),
                Ok(hash) => {
                    debug!(%hash, "duplicate hash within batch");
                    report.duplicates += 1;
                }
                Err(_) if self.is_dead(&ev.hash)? => report.dead_lettered += 1,
                Err(e) => {
                    warn!(hash = %ev.hash, user = ev.user, "rejected deposit: {e}");
                    self.record_rejection(&ev.hash, &e);
                    report.rejected += 1;
                }
            }
        }

        let hashes: Vec<DepositHash> = pending.iter().map(|(h, _)| h.clone()).collect();
        let known = store.deposits_by_hash(&hashes)?;

        for (hash, ev) in pending {
            if let Some(guard) = lease.as_mut() {
                guard.renew(self.clock.as_ref());
            }
            if known.contains_key(&hash) {
                report.known += 1;
                continue;
            }
            match self.ingest_event(&params, hash.clone(), ev, &mut report) {
                Ok(EventOutcome::Applied(applied)) => {
                    report.processed += 1;
                    debug!(
                        %hash,
                        user = ev.user,
                        slot = applied.slot.id,
                        residual = applied.distribution.residual,
                        "applied deposit"
                    );
                }
                Ok(EventOutcome::DeadLettered) => report.dead_lettered += 1,
                Ok(EventOutcome::Busy) => {
                    debug!(%hash, user = ev.user, "user holds a running slot; deferred");
                    report.busy += 1;
                }
                Err(e) => {
                    warn!(%hash, user = ev.user, kind = e.kind(), "skipped deposit: {e}");
                    match &e {
                        GridError::Validation(v) => {
                            self.record_rejection(hash.as_str(), v);
                            report.rejected += 1;
                        }
                        GridError::Conflict(_) => report.conflicts += 1,
                        GridError::Lease(_) | GridError::Storage(_) => report.failed += 1,
                    }
                }
            }
        }

        report.compacted += self.compact_logged().compacted;

        info!(
            received = report.received,
            processed = report.processed,
            known = report.known,
            busy = report.busy,
            rejected = report.rejected,
            dead_lettered = report.dead_lettered,
            conflicts = report.conflicts,
            failed = report.failed,
            compacted = report.compacted,
            leased = report.leased,
            "batch complete"
        );
        drop(lease);
        Ok(report)
    }

    fn ingest_event(
        &self,
        params: &RewardParams,
        hash: DepositHash,
        ev: &DepositEvent,
        report: &mut BatchReport,
    ) -> Result<EventOutcome, GridError> {
        let store = self.store();
        if self.is_dead(hash.as_str())? {
            return Ok(EventOutcome::DeadLettered);
        }
        if store.has_running_slot(ev.user)? {
            return Ok(EventOutcome::Busy);
        }
        report.compacted += self.compact_logged().compacted;

        let tier = tiers::for_raw_amount(ev.amount)?;
        let applied = self.apply_deposit(
            params,
            PendingDeposit {
                hash,
                user: ev.user,
                coin: ev.coin.clone(),
                raw_amount: ev.amount,
                tier,
                kind: "deposit",
            },
        )?;
        Ok(EventOutcome::Applied(Box::new(applied)))
    }

    /// Placement and distribution for one deposit, in one transaction.
    fn apply_deposit(&self, params: &RewardParams, deposit: PendingDeposit<'_>) -> Result<Applied, GridError> {
        let now = self.clock.now();
        let mut tx = StagedLedger::new(self.store());

        if tx.deposit_known(&deposit.hash)? {
            return Err(ConflictError::DuplicateHash(deposit.hash.to_string()).into());
        }
        if tx.has_running_slot(deposit.user)? {
            return Err(ValidationError::SlotAlreadyRunning(deposit.user).into());
        }
        let referral = tx.referral(deposit.user)?.ok_or(ValidationError::UnknownUser(deposit.user))?;
        referral.validate()?;
        let first_slot = tx.user_slots(deposit.user)?.is_empty();

        let placement = place_slot(&mut tx, deposit.user, deposit.tier, params, now)?;
        let ctx = DepositContext {
            hash: deposit.hash,
            user: deposit.user,
            coin: deposit.coin,
            raw_amount: deposit.raw_amount,
            kind: deposit.kind,
            tier: deposit.tier,
            chain: &referral.chain,
            first_slot,
            now,
        };
        let distribution = distribute(
            &mut tx,
            &ctx,
            &placement.slot,
            placement.carried,
            params,
            self.settings.matrix_mode,
        )?;
        tx.commit()?;

        Ok(Applied { slot: placement.slot, carried: placement.carried, distribution })
    }

    /// Operator entry: place and distribute a deposit of `amount` for `user`.
    ///
    /// `reference` identifies the entry; repeating it is rejected instead of
    /// applied twice. Every failure is returned to the caller.
    pub fn insert_manual(&self, user: UserId, amount: u64, reference: &str) -> Result<Applied, GridError> {
        let tier = tiers::for_operator_amount(amount)?;
        let hash = DepositHash::operator(reference)?;
        if self.store().has_running_slot(user)? {
            return Err(ValidationError::SlotAlreadyRunning(user).into());
        }
        recycler::compact_pending(self.store())?;
        let params = RewardParams::load(self.store())?;
        let applied = self.apply_deposit(
            &params,
            PendingDeposit {
                hash,
                user,
                coin: OPERATOR_COIN.to_string(),
                raw_amount: u128::from(amount),
                tier,
                kind: "operator",
            },
        )?;
        info!(user, amount, reference, slot = applied.slot.id, "operator deposit applied");
        Ok(applied)
    }

    /// Administrative override of a user's VIP tier.
    pub fn force_tier(&self, user: UserId, tier: u8) -> Result<UserInfo, GridError> {
        let mut tx = StagedLedger::new(self.store());
        let mut info = tx.user_info(user)?.ok_or(ValidationError::UnknownUser(user))?;
        vip::force(&mut info, tier)?;
        tx.put_user_info(info.clone());
        tx.commit()?;
        info!(user, tier, "forced vip tier");
        Ok(info)
    }

    pub fn register(&self, user: UserId, referrer: Option<UserId>) -> Result<(), GridError> {
        registry::register(self.store(), user, referrer, self.clock.now()).map(|_| ())
    }

    /// Run the recycler outside a batch.
    pub fn compact(&self) -> Result<CompactionReport, GridError> {
        recycler::compact_pending(self.store())
    }

    fn compact_logged(&self) -> CompactionReport {
        recycler::compact_pending(self.store()).unwrap_or_else(|e| {
            warn!("recycler run failed: {e}");
            CompactionReport::default()
        })
    }

    /// Count a batch-mode validation failure against `hash`, dead-lettering it
    /// once the configured attempt limit is reached.
    fn is_dead(&self, hash: &str) -> Result<bool, GridError> {
        Ok(self.store().rejection(hash)?.is_some_and(|r| r.dead))
    }

    fn record_rejection(&self, hash: &str, err: &ValidationError) {
        if let Err(e) = self.try_record_rejection(hash, err) {
            warn!(hash, "failed to record rejection: {e}");
        }
    }

    fn try_record_rejection(&self, hash: &str, err: &ValidationError) -> Result<(), GridError> {
        let store = self.store();
        let attempts = store.rejection(hash)?.map_or(0, |r| r.attempts) + 1;
        let dead = self.settings.validation_attempt_limit.is_some_and(|limit| attempts >= limit);
        let mut tx = StagedLedger::new(store);
        tx.put_rejection(Rejection {
            hash: hash.to_string(),
            attempts,
            last_reason: err.to_string(),
            dead,
        });
        tx.commit()?;
        if dead {
            warn!(hash, attempts, "dead-lettered deposit");
        }
        Ok(())
    }
}
