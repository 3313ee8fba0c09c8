//! Metrics collection for the feed
//!
//! Lock-free counters using atomic operations.
//! Updated from the reader/pump loops, read through snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// Feed metrics collector
///
/// Shared by every engine the client creates, so counters survive reconnects.
#[derive(Debug)]
pub struct FeedMetrics {
    /// Text/binary frames read from the socket
    frames_received: AtomicU64,
    /// Frames that failed to parse
    frames_dropped: AtomicU64,
    /// Hub invocations delivered on the data channel
    invocations_received: AtomicU64,
    /// Hub calls written to the socket
    calls_sent: AtomicU64,
    /// Feed events handed to subscribers
    events_emitted: AtomicU64,
    /// Feed events discarded because the subscriber's buffer was full
    events_dropped: AtomicU64,
    /// Payloads that failed base64/inflate/JSON decoding
    decode_failures: AtomicU64,
    /// Invocations with an unrecognised method tag
    unknown_methods: AtomicU64,
    /// Connections opened after the first one
    reconnects: AtomicU64,
    /// Last inbound frame timestamp (Unix millis)
    last_frame_time: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub invocations_received: u64,
    pub calls_sent: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub decode_failures: u64,
    pub unknown_methods: u64,
    pub reconnects: u64,
    pub event_rate: f64, // events per second
    pub uptime_seconds: u64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            invocations_received: AtomicU64::new(0),
            calls_sent: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            unknown_methods: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_frame_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invocation(&self) {
        self.invocations_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_call(&self) {
        self.calls_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_event(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_method(&self) {
        self.unknown_methods.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Unix millis of the last inbound frame, 0 if none yet
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let events = self.events_emitted.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            events as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            invocations_received: self.invocations_received.load(Ordering::Relaxed),
            calls_sent: self.calls_sent.load(Ordering::Relaxed),
            events_emitted: events,
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unknown_methods: self.unknown_methods.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            event_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}
