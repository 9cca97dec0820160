//! Ledger constants. All slot and reward amounts are in base units
//! (10^10 base units per whole coin of the deposit token).

/// Base units per whole coin.
pub const COIN: u64 = 10_000_000_000;

/// Width of a matrix row. Columns run `1..=GRID_COLUMNS`.
pub const GRID_COLUMNS: u8 = 3;

/// Matrix credit for a sibling sharing the new slot's row, in percent of the
/// distribution value.
pub const ROW_REWARD_PCT: u64 = 5;

/// Matrix credit for a sibling sharing the new slot's column.
pub const COLUMN_REWARD_PCT: u64 = 1;

/// Divisor converting a distribution value into area-aggregate units.
pub const AREA_UNIT: u64 = COIN;

/// Deepest ancestor (counting the direct referrer as depth 1) that receives
/// a depth reward.
pub const MAX_DEPTH_REWARD: usize = 6;

/// Highest VIP tier.
pub const MAX_VIP: u8 = 5;

/// Historical referral counts at which VIP tiers 1..=5 are reached.
pub const VIP_THRESHOLDS: [u64; MAX_VIP as usize] = [2, 4, 6, 8, 10];

/// Coin tag stamped on deposits entered by an operator.
pub const OPERATOR_COIN: &str = "OPERATOR";

// --- Config parameter keys ---

pub const KEY_RECOMMEND_NEED: &str = "recommend_need";
pub const KEY_RECOMMEND_NEED_DEPTH: [&str; 5] = [
    "recommend_need_two",
    "recommend_need_three",
    "recommend_need_four",
    "recommend_need_five",
    "recommend_need_six",
];
pub const KEY_RECOMMEND_NEED_VIP: [&str; MAX_VIP as usize] = [
    "recommend_need_vip1",
    "recommend_need_vip2",
    "recommend_need_vip3",
    "recommend_need_vip4",
    "recommend_need_vip5",
];
pub const KEY_TIME_AGAIN: &str = "time_again";
pub const KEY_LOCATION_ROW: &str = "location_row";

/// Every parameter key the reward engine reads at the start of a batch.
pub fn reward_config_keys() -> Vec<&'static str> {
    let mut keys = vec![KEY_RECOMMEND_NEED];
    keys.extend_from_slice(&KEY_RECOMMEND_NEED_DEPTH);
    keys.extend_from_slice(&KEY_RECOMMEND_NEED_VIP);
    keys.push(KEY_TIME_AGAIN);
    keys.push(KEY_LOCATION_ROW);
    keys
}
