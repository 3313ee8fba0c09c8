//! Liveness tracking for the hub socket
//!
//! Inbound pings are answered by the reader loop; this module only records
//! what was seen. The configured ping timeout feeds [`LivenessTracker::is_stale`]
//! but no timer is armed: deciding to drop a stale socket is left to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free record of socket activity
#[derive(Debug)]
pub struct LivenessTracker {
    /// Reference point for the millisecond offsets below
    epoch: Instant,
    /// Millis since epoch of the last pong, 0 = never
    last_pong: AtomicU64,
    /// Millis since epoch of the last inbound frame of any kind, 0 = never
    last_activity: AtomicU64,
    pings_answered: AtomicU64,
    ping_timeout: Duration,
}

impl LivenessTracker {
    pub fn new(ping_timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_pong: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            pings_answered: AtomicU64::new(0),
            ping_timeout,
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        // +1 keeps 0 free as the "never" marker
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    #[inline]
    pub fn record_pong(&self) {
        let now = self.now_ms();
        self.last_pong.store(now, Ordering::Relaxed);
        self.last_activity.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_activity(&self) {
        self.last_activity.store(self.now_ms(), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self) {
        self.pings_answered.fetch_add(1, Ordering::Relaxed);
        self.record_activity();
    }

    /// Forget previous socket activity
    pub fn reset(&self) {
        self.last_pong.store(0, Ordering::Relaxed);
        self.last_activity.store(0, Ordering::Relaxed);
    }

    /// No activity for longer than the ping timeout.
    ///
    /// Never stale before the first frame, nor when the timeout is zero.
    pub fn is_stale(&self) -> bool {
        if self.ping_timeout.is_zero() {
            return false;
        }
        let last = self.last_activity.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let idle = Duration::from_millis(self.now_ms().saturating_sub(last));
        idle > self.ping_timeout
    }

    pub fn health(&self) -> ConnectionHealth {
        let since = |marker: u64| {
            (marker != 0).then(|| Duration::from_millis(self.now_ms().saturating_sub(marker)))
        };
        ConnectionHealth {
            is_stale: self.is_stale(),
            since_last_pong: since(self.last_pong.load(Ordering::Relaxed)),
            since_last_activity: since(self.last_activity.load(Ordering::Relaxed)),
            pings_answered: self.pings_answered.load(Ordering::Relaxed),
        }
    }
}

/// Connection health snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub is_stale: bool,
    pub since_last_pong: Option<Duration>,
    pub since_last_activity: Option<Duration>,
    pub pings_answered: u64,
}
