//! Advisory batch lease.
//!
//! The lease is a single row with an owner and an expiry, so a crashed holder
//! blocks others only until the expiry passes. Failing to acquire it is not
//! an error: the batch runs without exclusivity. A held lease is renewed
//! between events once half of its ttl has passed.

use std::thread;
use std::time::Duration;

use slotgrid_core::error::GridError;
use slotgrid_core::traits::{Clock, LedgerStore};
use slotgrid_core::types::Lease;
use tracing::{debug, warn};

use crate::settings::LeaseSettings;

/// Held lease, released on drop.
pub struct LeaseGuard<'a> {
    store: &'a dyn LedgerStore,
    lease: Lease,
    ttl_secs: i64,
}

impl LeaseGuard<'_> {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Extend the lease when less than half of its ttl remains.
    ///
    /// Returns `false` when the lease was lost to another owner.
    pub fn renew(&mut self, clock: &dyn Clock) -> bool {
        let now = clock.now();
        if now < self.lease.expires_at - self.ttl_secs / 2 {
            return true;
        }
        match self.store.try_acquire_lease(&self.lease.owner, now, self.ttl_secs) {
            Ok(lease) => {
                debug!(owner = %lease.owner, expires_at = lease.expires_at, "renewed batch lease");
                self.lease = lease;
                true
            }
            Err(e) => {
                warn!(owner = %self.lease.owner, "failed to renew batch lease: {e}");
                false
            }
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        match self.store.release_lease(&self.lease.owner) {
            Ok(true) => debug!(owner = %self.lease.owner, "released batch lease"),
            Ok(false) => warn!(owner = %self.lease.owner, "batch lease already taken over"),
            Err(e) => warn!(owner = %self.lease.owner, "failed to release batch lease: {e}"),
        }
    }
}

/// Try to take the lease, retrying with a fixed backoff.
///
/// Returns `None` when the lease is disabled or could not be taken.
pub fn acquire<'a>(
    store: &'a dyn LedgerStore,
    clock: &dyn Clock,
    settings: &LeaseSettings,
) -> Option<LeaseGuard<'a>> {
    if !settings.enabled {
        return None;
    }
    let attempts = settings.retries.max(1);
    for attempt in 1..=attempts {
        match store.try_acquire_lease(&settings.owner, clock.now(), settings.ttl_secs) {
            Ok(lease) => {
                debug!(owner = %lease.owner, expires_at = lease.expires_at, "acquired batch lease");
                return Some(LeaseGuard { store, lease, ttl_secs: settings.ttl_secs });
            }
            Err(GridError::Lease(e)) => {
                debug!(attempt, "batch lease busy: {e}");
            }
            Err(e) => {
                warn!(attempt, "batch lease lookup failed: {e}");
            }
        }
        if attempt < attempts {
            thread::sleep(Duration::from_millis(settings.backoff_ms));
        }
    }
    warn!(attempts, "proceeding without batch lease");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgrid_core::memory::MemoryLedger;
    use slotgrid_core::traits::ManualClock;

    fn settings(owner: &str) -> LeaseSettings {
        LeaseSettings { owner: owner.into(), retries: 2, backoff_ms: 0, ..LeaseSettings::default() }
    }

    #[test]
    fn acquire_and_release_on_drop() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(1_000);
        {
            let guard = acquire(&store, &clock, &settings("a")).unwrap();
            assert_eq!(guard.lease().expires_at, 1_300);
            assert!(store.lease().is_some());
        }
        assert!(store.lease().is_none());
    }

    #[test]
    fn busy_lease_gives_up_without_error() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(0);
        store.try_acquire_lease("other", 0, 60).unwrap();
        assert!(acquire(&store, &clock, &settings("a")).is_none());
        assert_eq!(store.lease().unwrap().owner, "other");
    }

    #[test]
    fn expired_lease_taken_over() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(100);
        store.try_acquire_lease("crashed", 0, 60).unwrap();
        let guard = acquire(&store, &clock, &settings("a")).unwrap();
        assert_eq!(guard.lease().owner, "a");
    }

    #[test]
    fn renewal_waits_for_half_ttl() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(1_000);
        let mut guard = acquire(&store, &clock, &settings("a")).unwrap();
        clock.advance(100);
        assert!(guard.renew(&clock));
        assert_eq!(store.lease().unwrap().expires_at, 1_300);
        clock.advance(100);
        assert!(guard.renew(&clock));
        assert_eq!(guard.lease().expires_at, 1_500);
        assert_eq!(store.lease().unwrap().expires_at, 1_500);
    }

    #[test]
    fn renewal_reports_takeover() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(0);
        let mut guard = acquire(&store, &clock, &settings("a")).unwrap();
        clock.advance(400);
        store.try_acquire_lease("b", clock.now(), 60).unwrap();
        assert!(!guard.renew(&clock));
        assert_eq!(store.lease().unwrap().owner, "b");
    }

    #[test]
    fn disabled_lease_is_skipped() {
        let store = MemoryLedger::new();
        let clock = ManualClock::new(0);
        let off = LeaseSettings { enabled: false, ..settings("a") };
        assert!(acquire(&store, &clock, &off).is_none());
        assert!(store.lease().is_none());
    }
}
