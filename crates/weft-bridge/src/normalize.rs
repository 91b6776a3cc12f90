//! Dedup, throttle and circuit-breaker state for the event pipeline.
//!
//! All three are pure state machines keyed by (event kind, entity) strings.
//! Callers pass the current [`Instant`] explicitly, which keeps the logic
//! testable without waiting on real time, and call `sweep` on a coarse
//! cadence so per-entity state cannot grow without bound over a long-lived
//! session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Exact-match suppression of repeated values.
///
/// Used for monotonic progress-style events and duplicate entity ids: an
/// observation equal to the last seen value for its key carries no new
/// information and is suppressed.
pub struct Deduper {
    window: Duration,
    last: HashMap<String, (String, Instant)>,
}

impl Deduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Record an observation. Returns `true` if the value is new for this key
    /// and should be emitted.
    pub fn observe(&mut self, key: &str, value: &str, now: Instant) -> bool {
        match self.last.get(key) {
            Some((last, _)) if last == value => {
                self.last.insert(key.to_string(), (value.to_string(), now));
                false
            }
            _ => {
                self.last.insert(key.to_string(), (value.to_string(), now));
                true
            }
        }
    }

    /// Drop entries not touched within the rolling window.
    pub fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.last
            .retain(|_, (_, touched)| now.duration_since(*touched) < window);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

/// Minimum-interval suppression per key.
///
/// An event arriving sooner than `min_interval` after the last emission for
/// its key is suppressed. Used for high-frequency per-message streams (acks,
/// edits).
pub struct Throttle {
    min_interval: Duration,
    window: Duration,
    last_emit: HashMap<String, Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration, window: Duration) -> Self {
        Self {
            min_interval,
            window,
            last_emit: HashMap::new(),
        }
    }

    /// Whether an event for `key` may be emitted now. Records the emission
    /// when allowed.
    pub fn allow(&mut self, key: &str, now: Instant) -> bool {
        match self.last_emit.get(key) {
            Some(last) if now.duration_since(*last) < self.min_interval => false,
            _ => {
                self.last_emit.insert(key.to_string(), now);
                true
            }
        }
    }

    pub fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.last_emit
            .retain(|_, emitted| now.duration_since(*emitted) < window);
    }

    pub fn len(&self) -> usize {
        self.last_emit.len()
    }
}

struct BreakerEntry {
    failures: u32,
    window_start: Instant,
    last_decay: Instant,
    tripped: bool,
    /// Drops since the trip, for reduced-frequency logging.
    suppressed: u64,
}

/// Per-event-kind circuit breaker.
///
/// Repeated handler failures within the window trip the breaker; further
/// events of that kind are dropped until the failure count decays below the
/// threshold. Counts are halved once per decay period rather than cleared at
/// once, so a kind that keeps failing cannot flap between open and closed.
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    decay_period: Duration,
    entries: HashMap<String, BreakerEntry>,
}

/// Log every Nth suppressed event while a breaker is open.
const SUPPRESSION_LOG_EVERY: u64 = 50;

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration, decay_period: Duration) -> Self {
        Self {
            threshold,
            window,
            decay_period,
            entries: HashMap::new(),
        }
    }

    /// Record a handler failure for `kind`.
    pub fn record_failure(&mut self, kind: &str, now: Instant) {
        let entry = self.entries.entry(kind.to_string()).or_insert(BreakerEntry {
            failures: 0,
            window_start: now,
            last_decay: now,
            tripped: false,
            suppressed: 0,
        });

        // A failure outside the window starts a fresh count.
        if now.duration_since(entry.window_start) >= self.window {
            entry.failures = 0;
            entry.window_start = now;
        }
        entry.failures += 1;

        if !entry.tripped && entry.failures >= self.threshold {
            entry.tripped = true;
            entry.suppressed = 0;
            tracing::warn!(kind, failures = entry.failures, "circuit breaker tripped");
        }
    }

    /// Whether events of `kind` may currently flow. Applies pending decay
    /// first, so a tripped breaker recovers once its count falls below the
    /// threshold.
    pub fn allow(&mut self, kind: &str, now: Instant) -> bool {
        let threshold = self.threshold;
        let decay_period = self.decay_period;
        let Some(entry) = self.entries.get_mut(kind) else {
            return true;
        };

        // Halve the count once per elapsed decay period.
        while entry.failures > 0 && now.duration_since(entry.last_decay) >= decay_period {
            entry.failures /= 2;
            entry.last_decay += decay_period;
        }
        if entry.failures == 0 {
            entry.last_decay = now;
        }

        if entry.tripped && entry.failures < threshold {
            entry.tripped = false;
            tracing::info!(kind, "circuit breaker closed");
        }

        if entry.tripped {
            entry.suppressed += 1;
            if entry.suppressed % SUPPRESSION_LOG_EVERY == 1 {
                tracing::warn!(
                    kind,
                    suppressed = entry.suppressed,
                    "circuit breaker open, dropping events"
                );
            }
            false
        } else {
            true
        }
    }

    pub fn is_tripped(&self, kind: &str) -> bool {
        self.entries.get(kind).map(|e| e.tripped).unwrap_or(false)
    }

    /// Drop idle, untripped entries. Tripped entries are kept so their decay
    /// schedule keeps running.
    pub fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, entry| {
            entry.tripped
                || entry.failures > 0
                || now.duration_since(entry.window_start) < window
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
