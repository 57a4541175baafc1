//! Timer manager
//!
//! Running timers are ordered in a BTreeSet keyed by (deadline, timer id).
//! The manager never reads the wall clock: the event loop passes `now`
//! into [`OgsTimerMgr::start`] and [`OgsTimerMgr::pop_expired`], which
//! keeps expiry deterministic under test.
//!
//! A timer carries an opaque payload `T` that is handed back on expiry. The
//! payload usually names the owning object through a pool handle, so the
//! receiver can tell a timer whose owner was already released.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::pool::{OgsPool, OgsPoolId};

/// Timer handle
pub type OgsTimerId = OgsPoolId;

#[derive(Debug)]
struct OgsTimer<T> {
    data: T,
    deadline: Option<Instant>,
}

/// Timer manager (ogs_timer_mgr_t)
pub struct OgsTimerMgr<T> {
    pool: OgsPool<OgsTimer<T>>,
    tree: BTreeSet<(Instant, OgsTimerId)>,
}

impl<T: Clone> OgsTimerMgr<T> {
    pub fn new(capacity: usize) -> Self {
        OgsTimerMgr {
            pool: OgsPool::new("timer", capacity),
            tree: BTreeSet::new(),
        }
    }

    /// Register a stopped timer carrying `data` (ogs_timer_add).
    pub fn add(&mut self, data: T) -> Option<OgsTimerId> {
        self.pool.alloc(OgsTimer {
            data,
            deadline: None,
        })
    }

    /// Stop and release a timer (ogs_timer_delete).
    pub fn delete(&mut self, id: OgsTimerId) {
        self.stop(id);
        self.pool.free(id);
    }

    /// Arm (or re-arm) a timer to fire `duration` after `now`.
    pub fn start(&mut self, id: OgsTimerId, now: Instant, duration: Duration) {
        let Some(timer) = self.pool.find_mut(id) else {
            log::warn!("start on unknown timer {:?}", id);
            return;
        };
        if let Some(old) = timer.deadline.take() {
            self.tree.remove(&(old, id));
        }
        let deadline = now + duration;
        timer.deadline = Some(deadline);
        self.tree.insert((deadline, id));
    }

    /// Disarm a timer. Stopping a stopped timer is a no-op.
    pub fn stop(&mut self, id: OgsTimerId) {
        if let Some(timer) = self.pool.find_mut(id) {
            if let Some(deadline) = timer.deadline.take() {
                self.tree.remove(&(deadline, id));
            }
        }
    }

    pub fn is_running(&self, id: OgsTimerId) -> bool {
        self.pool
            .find(id)
            .map(|timer| timer.deadline.is_some())
            .unwrap_or(false)
    }

    pub fn data(&self, id: OgsTimerId) -> Option<&T> {
        self.pool.find(id).map(|timer| &timer.data)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tree.iter().next().map(|(deadline, _)| *deadline)
    }

    /// Time left until the earliest deadline (ogs_timer_mgr_next).
    ///
    /// `None` means nothing is armed and the caller may wait indefinitely.
    pub fn next(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Pop one timer whose deadline is not after `now`.
    ///
    /// Expired timers are popped one at a time so that a handler which stops
    /// another timer that is also due prevents it from firing.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(OgsTimerId, T)> {
        let (deadline, id) = *self.tree.iter().next()?;
        if deadline > now {
            return None;
        }
        self.tree.remove(&(deadline, id));
        let timer = self.pool.find_mut(id)?;
        timer.deadline = None;
        Some((id, timer.data.clone()))
    }

    /// Number of registered timers, armed or not.
    pub fn count(&self) -> usize {
        self.pool.allocated()
    }

    /// Number of armed timers.
    pub fn running(&self) -> usize {
        self.tree.len()
    }
}
