//! Process-level engine settings.
//!
//! Reward percentages are not here: they are ledger state (see
//! [`RewardParams`](crate::params::RewardParams)). These settings come from
//! the node configuration file.

use serde::{Deserialize, Serialize};

/// Which sibling lines earn a matrix reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixMode {
    /// Row siblings earn the row rate, column siblings the column rate.
    #[default]
    RowAndColumn,
    /// Only column siblings earn a reward.
    ColumnOnly,
}

/// Advisory batch lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    pub enabled: bool,
    /// Identity written into the lease row.
    pub owner: String,
    pub ttl_secs: i64,
    /// Acquisition attempts before proceeding without the lease.
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            owner: "slotgrid".to_string(),
            ttl_secs: 300,
            retries: 3,
            backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub matrix_mode: MatrixMode,
    pub lease: LeaseSettings,
    /// Validation failures after which a batch hash is dead-lettered.
    /// `None` retries forever.
    pub validation_attempt_limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matrix_mode_is_row_and_column() {
        assert_eq!(EngineSettings::default().matrix_mode, MatrixMode::RowAndColumn);
    }

    #[test]
    fn default_lease_retries_three_times() {
        let lease = LeaseSettings::default();
        assert!(lease.enabled);
        assert_eq!(lease.retries, 3);
        assert_eq!(lease.backoff_ms, 5_000);
    }

    #[test]
    fn default_retries_validation_forever() {
        assert_eq!(EngineSettings::default().validation_attempt_limit, None);
    }
}
