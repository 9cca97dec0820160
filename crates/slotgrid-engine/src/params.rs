//! Reward parameters, read from the ledger once per batch.

use slotgrid_core::constants::{
    KEY_LOCATION_ROW, KEY_RECOMMEND_NEED, KEY_RECOMMEND_NEED_DEPTH, KEY_RECOMMEND_NEED_VIP,
    KEY_TIME_AGAIN, MAX_VIP, reward_config_keys,
};
use slotgrid_core::error::GridError;
use slotgrid_core::traits::LedgerStore;

/// Percentages are whole percent. Missing or negative values read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardParams {
    /// Direct referrer rate, also the base of the depth rewards.
    pub recommend_need: u64,
    /// Depth-reward rates for depths 2..=6, applied to the referrer amount.
    pub depth_pct: [u64; 5],
    /// VIP bonus rates for tiers 1..=5.
    pub vip_pct: [u64; MAX_VIP as usize],
    /// Grace window after a stop during which overflow carries over.
    pub grace_minutes: i64,
    /// Column-match row span for matrix siblings.
    pub row_span: u64,
}

impl RewardParams {
    pub fn load(store: &dyn LedgerStore) -> Result<Self, GridError> {
        let values = store.config_values(&reward_config_keys())?;
        let get = |key: &str| values.get(key).copied().unwrap_or(0).max(0);

        let mut params = Self {
            recommend_need: get(KEY_RECOMMEND_NEED) as u64,
            grace_minutes: get(KEY_TIME_AGAIN),
            row_span: get(KEY_LOCATION_ROW) as u64,
            ..Self::default()
        };
        for (slot, key) in params.depth_pct.iter_mut().zip(KEY_RECOMMEND_NEED_DEPTH) {
            *slot = get(key) as u64;
        }
        for (slot, key) in params.vip_pct.iter_mut().zip(KEY_RECOMMEND_NEED_VIP) {
            *slot = get(key) as u64;
        }
        Ok(params)
    }

    /// VIP bonus rate for `tier`. Tier 0 earns nothing.
    pub fn vip_pct(&self, tier: u8) -> u64 {
        match tier {
            0 => 0,
            t => self.vip_pct.get(usize::from(t) - 1).copied().unwrap_or(0),
        }
    }

    /// Depth-reward rate for `depth` in 2..=6.
    pub fn depth_pct(&self, depth: usize) -> u64 {
        depth
            .checked_sub(2)
            .and_then(|i| self.depth_pct.get(i))
            .copied()
            .unwrap_or(0)
    }

    pub fn grace_secs(&self) -> i64 {
        self.grace_minutes.saturating_mul(60)
    }
}

/// `value * pct / 100`, rounded down.
pub fn percent_of(value: u64, pct: u64) -> u64 {
    (u128::from(value) * u128::from(pct) / 100) as u64
}
