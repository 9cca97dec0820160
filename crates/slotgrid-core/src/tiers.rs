//! Fixed deposit tier table.

use crate::error::ValidationError;

/// Parameters a deposit of a given tier opens a slot with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub tier: u8,
    /// Raw on-chain amount (smallest token unit) that maps to this tier.
    pub raw_amount: u128,
    /// Amount an operator enters for a manual deposit of this tier.
    pub operator_amount: u64,
    pub capacity: u64,
    /// Value redistributed by the reward engine.
    pub distribution_value: u64,
    /// Bonus token credited to the depositor.
    pub bonus: u64,
}

const E18: u128 = 1_000_000_000_000_000_000;

pub const TIERS: [TierSpec; 3] = [
    TierSpec {
        tier: 1,
        raw_amount: 100 * E18,
        operator_amount: 50,
        capacity: 5_000_000_000_000,
        distribution_value: 1_000_000_000_000,
        bonus: 1_000_000_000_000,
    },
    TierSpec {
        tier: 2,
        raw_amount: 300 * E18,
        operator_amount: 100,
        capacity: 15_000_000_000_000,
        distribution_value: 3_000_000_000_000,
        bonus: 3_000_000_000_000,
    },
    TierSpec {
        tier: 3,
        raw_amount: 500 * E18,
        operator_amount: 300,
        capacity: 25_000_000_000_000,
        distribution_value: 5_000_000_000_000,
        bonus: 5_000_000_000_000,
    },
];

/// Map a raw deposit amount to its tier.
pub fn for_raw_amount(amount: u128) -> Result<&'static TierSpec, ValidationError> {
    TIERS
        .iter()
        .find(|t| t.raw_amount == amount)
        .ok_or_else(|| ValidationError::UnmappedAmount(amount.to_string()))
}

/// Map an operator-entered amount to its tier.
pub fn for_operator_amount(amount: u64) -> Result<&'static TierSpec, ValidationError> {
    TIERS
        .iter()
        .find(|t| t.operator_amount == amount)
        .ok_or_else(|| ValidationError::UnmappedAmount(amount.to_string()))
}

pub fn by_tier(tier: u8) -> Result<&'static TierSpec, ValidationError> {
    TIERS
        .iter()
        .find(|t| t.tier == tier)
        .ok_or(ValidationError::InvalidTier(tier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_amounts_map_to_tiers() {
        let t1 = for_raw_amount(100_000_000_000_000_000_000).unwrap();
        assert_eq!(t1.tier, 1);
        assert_eq!(t1.capacity, 5_000_000_000_000);
        assert_eq!(t1.distribution_value, 1_000_000_000_000);
        assert_eq!(for_raw_amount(300 * E18).unwrap().tier, 2);
        assert_eq!(for_raw_amount(500 * E18).unwrap().tier, 3);
    }

    #[test]
    fn unmapped_raw_amount_rejected() {
        let err = for_raw_amount(200 * E18).unwrap_err();
        assert_eq!(err, ValidationError::UnmappedAmount((200 * E18).to_string()));
        assert!(for_raw_amount(0).is_err());
    }

    #[test]
    fn operator_amounts_map_to_tiers() {
        assert_eq!(for_operator_amount(50).unwrap().tier, 1);
        assert_eq!(for_operator_amount(100).unwrap().tier, 2);
        assert_eq!(for_operator_amount(300).unwrap().tier, 3);
        assert!(for_operator_amount(500).is_err());
    }

    #[test]
    fn capacity_is_five_times_distribution_value() {
        for t in &TIERS {
            assert_eq!(t.capacity, 5 * t.distribution_value);
            assert_eq!(by_tier(t.tier).unwrap(), t);
        }
        assert_eq!(by_tier(4).unwrap_err(), ValidationError::InvalidTier(4));
    }
}
