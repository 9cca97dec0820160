//! Error types for the SlotGrid ledger.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unmapped deposit amount: {0}")] UnmappedAmount(String),
    #[error("invalid tier: {0}")] InvalidTier(u8),
    #[error("malformed referral chain for user {user}: {reason}")] MalformedChain { user: u64, reason: String },
    #[error("malformed deposit hash: {0}")] MalformedHash(String),
    #[error("unknown user: {0}")] UnknownUser(u64),
    #[error("user {0} is already registered")] AlreadyRegistered(u64),
    #[error("user {0} already holds a running slot")] SlotAlreadyRunning(u64),
    #[error("invalid user id: {0}")] InvalidUserId(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("slot {0} is no longer running")] SlotNotRunning(u64),
    #[error("slot not found: {0}")] SlotNotFound(u64),
    #[error("slot id out of sequence: expected {expected}, got {got}")] SlotOutOfSequence { expected: u64, got: u64 },
    #[error("deposit hash already recorded: {0}")] DuplicateHash(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease held by {owner} until {expires_at}")] Held { owner: String, expires_at: i64 },
}

#[derive(Error, Debug)]
pub enum GridError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Conflict(#[from] ConflictError),
    #[error(transparent)] Lease(#[from] LeaseError),
    #[error("storage: {0}")] Storage(String),
}

impl GridError {
    /// Whether the failing event may succeed unchanged on a later batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(ConflictError::SlotNotRunning(_)))
            || matches!(self, Self::Conflict(ConflictError::SlotOutOfSequence { .. }))
            || matches!(self, Self::Storage(_))
    }

    /// Short outcome label used in batch reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Lease(_) => "lease",
            Self::Storage(_) => "storage",
        }
    }
}
