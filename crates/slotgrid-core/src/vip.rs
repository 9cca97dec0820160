//! VIP tier evaluation from historical referral counts.

use crate::constants::{MAX_VIP, VIP_THRESHOLDS};
use crate::error::ValidationError;
use crate::types::UserInfo;

/// Highest tier whose threshold `count` has reached.
pub fn tier_for_count(count: u64) -> u8 {
    VIP_THRESHOLDS.iter().take_while(|&&t| count >= t).count() as u8
}

/// Counter value at which `tier` is first reached. Tier 0 maps to 0.
pub fn threshold_for_tier(tier: u8) -> Result<u64, ValidationError> {
    match tier {
        0 => Ok(0),
        t if t <= MAX_VIP => Ok(VIP_THRESHOLDS[usize::from(t) - 1]),
        t => Err(ValidationError::InvalidTier(t)),
    }
}

/// Count one more activated direct referral and recompute the tier.
///
/// Returns `true` if the tier went up.
pub fn record_referral(info: &mut UserInfo) -> bool {
    info.history_referrals += 1;
    let next = tier_for_count(info.history_referrals);
    let raised = next > info.vip;
    if raised {
        info.vip = next;
    }
    raised
}

/// Administrative override: set the tier and move the counter to its threshold.
pub fn force(info: &mut UserInfo, tier: u8) -> Result<(), ValidationError> {
    info.history_referrals = threshold_for_tier(tier)?;
    info.vip = tier;
    Ok(())
}
