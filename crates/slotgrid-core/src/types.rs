//! Core ledger types: slots, deposits, referrals, balances, ledger entries.
//!
//! Slot and reward amounts are `u64` base units. Raw deposit amounts are the
//! token's smallest on-chain unit and can exceed `u64`, so they are `u128`.
//! Timestamps are Unix seconds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::GRID_COLUMNS;
use crate::error::ValidationError;

pub type UserId = u64;
pub type SlotId = u64;

/// Lifecycle of a slot. `Running -> Stop` happens at most once.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Running,
    Stop,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// A position in the matrix. Rows start at 1, columns run `1..=GRID_COLUMNS`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct Coordinate {
    pub row: u64,
    pub col: u8,
}

impl Coordinate {
    /// The first position of an empty grid.
    pub const ORIGIN: Self = Self { row: 1, col: 1 };

    pub fn new(row: u64, col: u8) -> Self {
        Self { row, col }
    }

    /// The position that follows `self` in row-major fill order.
    pub fn next(self) -> Self {
        if self.col < GRID_COLUMNS {
            Self { row: self.row, col: self.col + 1 }
        } else {
            Self { row: self.row + 1, col: 1 }
        }
    }

    /// The position that precedes `self`, used when a gap is compacted.
    ///
    /// Column 1 wraps to the last column of the previous row. Row 1 column 1
    /// saturates at row 0.
    pub fn previous(self) -> Self {
        if self.col > 1 {
            Self { row: self.row, col: self.col - 1 }
        } else {
            Self { row: self.row.saturating_sub(1), col: GRID_COLUMNS }
        }
    }

    /// Placement rule: follows the highest-id running slot, or starts at the origin.
    pub fn after(last_running: Option<Coordinate>) -> Self {
        last_running.map(Coordinate::next).unwrap_or(Self::ORIGIN)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Effect of crediting a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CreditOutcome {
    /// Amount the caller asked to credit.
    pub requested: u64,
    /// Amount absorbed into `accumulated`.
    pub applied: u64,
    /// Amount beyond capacity, added to the slot's overflow.
    pub overflow: u64,
    /// Whether this credit moved the slot from running to stop.
    pub stopped: bool,
}

/// A capacity-bounded accumulation unit tied to one placement.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct Slot {
    pub id: SlotId,
    pub user: UserId,
    pub coord: Coordinate,
    /// Deposit tier (1..=3) this slot was opened with.
    pub tier: u8,
    pub accumulated: u64,
    pub capacity: u64,
    /// Credited value the slot could not absorb once full.
    pub overflow: u64,
    pub status: SlotStatus,
    /// Set exactly once, on the running -> stop transition.
    pub stopped_at: Option<i64>,
    /// Set by the recycler once the gap left by this stopped slot is closed.
    pub compacted: bool,
    pub created_at: i64,
}

impl Slot {
    /// Open a running slot. A starting amount at or above capacity opens the
    /// slot already stopped.
    pub fn open(
        id: SlotId,
        user: UserId,
        coord: Coordinate,
        tier: u8,
        starting: u64,
        capacity: u64,
        now: i64,
    ) -> Self {
        let mut slot = Self {
            id,
            user,
            coord,
            tier,
            accumulated: 0,
            capacity,
            overflow: 0,
            status: SlotStatus::Running,
            stopped_at: None,
            compacted: false,
            created_at: now,
        };
        slot.credit(starting, now);
        slot
    }

    pub fn is_running(&self) -> bool {
        self.status == SlotStatus::Running
    }

    /// Remaining room before the slot reaches capacity.
    pub fn headroom(&self) -> u64 {
        self.capacity.saturating_sub(self.accumulated)
    }

    /// Credit `amount`, capping `accumulated` at capacity.
    ///
    /// The excess goes to `overflow`. Reaching capacity stops the slot and
    /// stamps `stopped_at` only if it was running. Crediting a stopped slot
    /// only grows its overflow.
    pub fn credit(&mut self, amount: u64, now: i64) -> CreditOutcome {
        let applied = if self.is_running() { amount.min(self.headroom()) } else { 0 };
        let overflow = amount - applied;
        self.accumulated += applied;
        self.overflow = self.overflow.saturating_add(overflow);

        let mut stopped = false;
        if self.is_running() && self.accumulated >= self.capacity {
            self.status = SlotStatus::Stop;
            self.stopped_at = Some(now);
            stopped = true;
        }

        CreditOutcome { requested: amount, applied, overflow, stopped }
    }

    /// Overflow still claimable by the owner's next slot.
    pub fn carry_over(&self) -> u64 {
        if self.is_running() { 0 } else { self.overflow }
    }
}

/// Tagged deposit hash. Chain deposits carry a hex transaction hash;
/// operator entries carry a caller-chosen reference.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct DepositHash(String);

impl DepositHash {
    /// Parse a `0x`-prefixed (or bare) hex transaction hash, normalised to lowercase.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if body.is_empty() || hex::decode(body).is_err() {
            return Err(ValidationError::MalformedHash(raw.to_string()));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Hash for an operator-entered deposit.
    pub fn operator(reference: &str) -> Result<Self, ValidationError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ValidationError::MalformedHash(reference.to_string()));
        }
        Ok(Self(format!("operator:{reference}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DepositHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decimal string encoding for raw `u128` amounts in JSON.
mod decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.trim().parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// An externally sourced deposit, already deserialised by the poller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DepositEvent {
    pub user: UserId,
    pub hash: String,
    pub coin: String,
    #[serde(with = "decimal")]
    pub amount: u128,
}

/// A processed deposit. One record per hash, ever.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct DepositRecord {
    pub hash: DepositHash,
    pub user: UserId,
    pub coin: String,
    pub amount: u128,
    pub status: String,
    pub kind: String,
    /// Slot opened for this deposit.
    pub slot: SlotId,
    pub recorded_at: i64,
}

/// Immutable ancestor path of a user, root first, direct referrer last.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct Referral {
    pub user: UserId,
    pub chain: Vec<UserId>,
    pub created_at: i64,
}

impl Referral {
    /// The user's direct referrer, if any.
    pub fn direct_referrer(&self) -> Option<UserId> {
        self.chain.last().copied()
    }

    /// Ancestors above the direct referrer, nearest first.
    pub fn upper_ancestors(&self) -> impl Iterator<Item = UserId> + '_ {
        self.chain.iter().rev().skip(1).copied()
    }

    /// Reject chains that could not have been built by registration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedChain {
            user: self.user,
            reason: reason.to_string(),
        };
        if self.chain.iter().any(|&id| id == 0) {
            return Err(malformed("zero id in chain"));
        }
        if self.chain.contains(&self.user) {
            return Err(malformed("user appears in own chain"));
        }
        let mut seen = self.chain.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.chain.len() {
            return Err(malformed("repeated ancestor"));
        }
        Ok(())
    }
}

/// Per-user VIP state.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default, bincode::Encode, bincode::Decode,
)]
pub struct UserInfo {
    pub user: UserId,
    pub vip: u8,
    /// Count of direct referrals whose first-ever slot was placed.
    pub history_referrals: u64,
}

/// Running totals of own and descendant deposit value.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default, bincode::Encode, bincode::Decode,
)]
pub struct AreaAggregate {
    pub user: UserId,
    pub self_amount: u64,
    pub area_amount: u64,
}

/// Visible balances of a user.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default, bincode::Encode, bincode::Decode,
)]
pub struct Balance {
    pub user: UserId,
    pub primary: u64,
    pub bonus: u64,
}

/// Direct referral that counted toward the referrer's VIP level.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct ReferralActivation {
    pub referrer: UserId,
    pub referred: UserId,
    pub at: i64,
}

/// Which matrix line a sibling shares with the new slot.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum MatrixAxis {
    Row,
    Column,
}

/// Category of a ledger entry.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Matrix(MatrixAxis),
    NormalRecommend,
    /// VIP bonus paid to the direct referrer.
    Recommend,
    /// Fixed-rate reward paid to the ancestor at the given depth.
    DepthRecommend(u8),
    /// Waterfall increment paid to an ancestor of the given tier.
    RecommendTop(u8),
    System,
    Deposit,
    DepositCarryOver,
}

impl EntryKind {
    /// Whether the entry is part of a deposit's distribution value.
    pub fn is_distribution(&self) -> bool {
        !matches!(self, Self::Deposit | Self::DepositCarryOver)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Matrix(MatrixAxis::Row) => "matrix_row",
            Self::Matrix(MatrixAxis::Column) => "matrix_column",
            Self::NormalRecommend => "normal_recommend",
            Self::Recommend => "recommend",
            Self::DepthRecommend(_) => "depth_recommend",
            Self::RecommendTop(_) => "recommend_top",
            Self::System => "system",
            Self::Deposit => "deposit",
            Self::DepositCarryOver => "deposit_carry_over",
        }
    }
}

/// Append-only balance/reward entry.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct LedgerEntry {
    /// Assigned by the store on commit.
    pub seq: u64,
    /// `None` for the unattributed system entry.
    pub user: Option<UserId>,
    pub kind: EntryKind,
    /// Credited amount. Only the system residual can be negative.
    pub amount: i64,
    /// Slot whose placement produced this entry.
    pub source_slot: SlotId,
    /// Slot the amount was credited to, if any.
    pub target_slot: Option<SlotId>,
    /// Part of `amount` the target slot absorbed.
    pub applied: u64,
    pub at: i64,
}

/// Batch-mode validation failures recorded against a hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct Rejection {
    pub hash: String,
    pub attempts: u32,
    pub last_reason: String,
    /// Dead-lettered hashes are skipped by later batches.
    pub dead: bool,
}

/// Advisory batch lock.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct Lease {
    pub owner: String,
    pub expires_at: i64,
}

impl Lease {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CAP: u64 = 5_000_000_000_000;

    fn slot(accumulated: u64) -> Slot {
        Slot::open(1, 7, Coordinate::ORIGIN, 1, accumulated, CAP, 100)
    }

    #[test]
    fn coordinate_fill_order() {
        let mut c = Coordinate::after(None);
        let mut seen = vec![c];
        for _ in 0..5 {
            c = c.next();
            seen.push(c);
        }
        let expected = [(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3)];
        let got: Vec<(u64, u8)> = seen.iter().map(|c| (c.row, c.col)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn coordinate_previous_wraps() {
        assert_eq!(Coordinate::new(3, 2).previous(), Coordinate::new(3, 1));
        assert_eq!(Coordinate::new(3, 1).previous(), Coordinate::new(2, 3));
        assert_eq!(Coordinate::new(2, 3).next().previous(), Coordinate::new(2, 3));
    }

    #[test]
    fn credit_below_capacity_stays_running() {
        let mut s = slot(0);
        let out = s.credit(1_000, 200);
        assert_eq!(out, CreditOutcome { requested: 1_000, applied: 1_000, overflow: 0, stopped: false });
        assert!(s.is_running());
        assert_eq!(s.stopped_at, None);
    }

    #[test]
    fn credit_past_capacity_truncates_and_stops() {
        let mut s = slot(4_900_000_000_000);
        let out = s.credit(500_000_000_000, 300);
        assert_eq!(out.applied, 100_000_000_000);
        assert_eq!(out.overflow, 400_000_000_000);
        assert!(out.stopped);
        assert_eq!(s.accumulated, CAP);
        assert_eq!(s.status, SlotStatus::Stop);
        assert_eq!(s.stopped_at, Some(300));
        assert_eq!(s.carry_over(), 400_000_000_000);
    }

    #[test]
    fn stop_time_is_stamped_once() {
        let mut s = slot(CAP - 1);
        assert!(s.credit(1, 10).stopped);
        let again = s.credit(50, 20);
        assert!(!again.stopped);
        assert_eq!(again.applied, 0);
        assert_eq!(s.stopped_at, Some(10));
        assert_eq!(s.overflow, 50);
    }

    #[test]
    fn opening_at_capacity_opens_stopped() {
        let s = slot(CAP);
        assert_eq!(s.status, SlotStatus::Stop);
        assert_eq!(s.stopped_at, Some(100));
    }

    #[test]
    fn deposit_hash_normalises_hex() {
        let h = DepositHash::parse("0xABcd01").unwrap();
        assert_eq!(h.as_str(), "0xabcd01");
        assert_eq!(DepositHash::parse("abcd01").unwrap(), h);
        assert!(DepositHash::parse("0xzz").is_err());
        assert!(DepositHash::parse("").is_err());
        assert!(DepositHash::parse("0xabc").is_err());
    }

    #[test]
    fn operator_hash_is_distinct_namespace() {
        let h = DepositHash::operator("ticket-9").unwrap();
        assert_eq!(h.as_str(), "operator:ticket-9");
        assert!(DepositHash::operator("  ").is_err());
    }

    #[test]
    fn referral_chain_navigation() {
        let r = Referral { user: 9, chain: vec![1, 4, 6], created_at: 0 };
        assert_eq!(r.direct_referrer(), Some(6));
        assert_eq!(r.upper_ancestors().collect::<Vec<_>>(), vec![4, 1]);
        assert!(r.validate().is_ok());

        let root = Referral { user: 1, chain: vec![], created_at: 0 };
        assert_eq!(root.direct_referrer(), None);
        assert_eq!(root.upper_ancestors().count(), 0);
    }

    #[test]
    fn referral_chain_rejects_cycles() {
        let own = Referral { user: 4, chain: vec![1, 4], created_at: 0 };
        assert!(own.validate().is_err());
        let repeated = Referral { user: 9, chain: vec![1, 2, 1], created_at: 0 };
        assert!(repeated.validate().is_err());
        let zero = Referral { user: 9, chain: vec![0, 2], created_at: 0 };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn deposit_event_amount_is_decimal_string() {
        let json = r#"{"user":3,"hash":"0x01","coin":"USDT","amount":"100000000000000000000"}"#;
        let ev: DepositEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.amount, 100_000_000_000_000_000_000);
        let back = serde_json::to_string(&ev).unwrap();
        assert!(back.contains(r#""amount":"100000000000000000000""#));
    }

    #[test]
    fn entry_kind_distribution_split() {
        assert!(EntryKind::System.is_distribution());
        assert!(EntryKind::Matrix(MatrixAxis::Row).is_distribution());
        assert!(!EntryKind::Deposit.is_distribution());
        assert!(!EntryKind::DepositCarryOver.is_distribution());
    }

    proptest! {
        #[test]
        fn previous_undoes_next(row in 1u64..10_000, col in 1u8..=GRID_COLUMNS) {
            let c = Coordinate::new(row, col);
            prop_assert_eq!(c.next().previous(), c);
        }
    }
}
