//! User registration: user info, immutable referral chain, zero balances.

use slotgrid_core::error::{GridError, ValidationError};
use slotgrid_core::staged::StagedLedger;
use slotgrid_core::traits::LedgerStore;
use slotgrid_core::types::{Referral, UserId, UserInfo};
use tracing::info;

/// Register `user`, optionally under `referrer`, in one transaction.
///
/// The chain is the referrer's chain followed by the referrer, computed once
/// here and never rewritten.
pub fn register(
    store: &dyn LedgerStore,
    user: UserId,
    referrer: Option<UserId>,
    now: i64,
) -> Result<Referral, GridError> {
    if user == 0 {
        return Err(ValidationError::InvalidUserId(user).into());
    }
    let mut tx = StagedLedger::new(store);
    if tx.user_info(user)?.is_some() || tx.referral(user)?.is_some() {
        return Err(ValidationError::AlreadyRegistered(user).into());
    }

    let chain = match referrer {
        None => Vec::new(),
        Some(r) if r == user => {
            return Err(ValidationError::MalformedChain {
                user,
                reason: "self-referral".to_string(),
            }
            .into());
        }
        Some(r) => {
            let parent = tx.referral(r)?.ok_or(ValidationError::UnknownUser(r))?;
            let mut chain = parent.chain;
            chain.push(r);
            chain
        }
    };

    let referral = Referral { user, chain, created_at: now };
    tx.put_referral(referral.clone())?;
    tx.put_user_info(UserInfo { user, vip: 0, history_referrals: 0 });
    tx.credit_balance(user, 0, 0);
    tx.add_area(user, 0, 0);
    tx.commit()?;

    info!(user, referrer = ?referrer, depth = referral.chain.len(), "registered user");
    Ok(referral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgrid_core::memory::MemoryLedger;

    #[test]
    fn root_user_has_empty_chain() {
        let store = MemoryLedger::new();
        let r = register(&store, 1, None, 0).unwrap();
        assert!(r.chain.is_empty());
        assert_eq!(store.user_info(1).unwrap().unwrap().vip, 0);
        assert_eq!(store.balance(1).unwrap().unwrap().primary, 0);
        assert_eq!(store.area(1).unwrap().unwrap().area_amount, 0);
    }

    #[test]
    fn chain_extends_referrer_chain() {
        let store = MemoryLedger::new();
        register(&store, 1, None, 0).unwrap();
        register(&store, 2, Some(1), 0).unwrap();
        let r = register(&store, 3, Some(2), 0).unwrap();
        assert_eq!(r.chain, vec![1, 2]);
        assert_eq!(store.referral(3).unwrap().unwrap().direct_referrer(), Some(2));
    }

    #[test]
    fn unknown_referrer_rejected() {
        let store = MemoryLedger::new();
        let err = register(&store, 2, Some(9), 0).unwrap_err();
        assert!(matches!(err, GridError::Validation(ValidationError::UnknownUser(9))));
        assert!(store.user_info(2).unwrap().is_none());
    }

    #[test]
    fn self_referral_rejected() {
        let store = MemoryLedger::new();
        let err = register(&store, 4, Some(4), 0).unwrap_err();
        assert!(matches!(err, GridError::Validation(ValidationError::MalformedChain { .. })));
    }

    #[test]
    fn double_registration_rejected() {
        let store = MemoryLedger::new();
        register(&store, 1, None, 0).unwrap();
        let err = register(&store, 1, None, 0).unwrap_err();
        assert!(matches!(err, GridError::Validation(ValidationError::AlreadyRegistered(1))));
    }

    #[test]
    fn zero_id_rejected() {
        let store = MemoryLedger::new();
        assert!(register(&store, 0, None, 0).is_err());
    }
}
