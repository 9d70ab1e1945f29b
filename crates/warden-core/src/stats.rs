//! Process-wide ingestion statistics.
//!
//! One instance lives for the whole engine run, shared as an `Arc`.
//! Counters are monotonic and relaxed: they are diagnostics, not
//! synchronization. `reset` exists for explicit operator requests only.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Statistics {
    events_seen: AtomicU64,
    events_filtered: AtomicU64,
    events_emitted: AtomicU64,
    events_dropped: AtomicU64,
    verdicts_banned: AtomicU64,
    verdicts_dangerous: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record arrived from the source.
    pub fn record_seen(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// A decoded event was filtered out of the verdict path (e.g. raw
    /// syscall telemetry forwarded elsewhere).
    pub fn record_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// A decoded event went through policy evaluation.
    pub fn record_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records lost: malformed input or queue overflow at the source.
    pub fn add_dropped(&self, n: u64) {
        self.events_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_banned(&self) {
        self.verdicts_banned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dangerous(&self) {
        self.verdicts_dangerous.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            verdicts_banned: self.verdicts_banned.load(Ordering::Relaxed),
            verdicts_dangerous: self.verdicts_dangerous.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Only called on explicit operator request.
    pub fn reset(&self) {
        self.events_seen.store(0, Ordering::Relaxed);
        self.events_filtered.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.verdicts_banned.store(0, Ordering::Relaxed);
        self.verdicts_dangerous.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_seen: u64,
    pub events_filtered: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub verdicts_banned: u64,
    pub verdicts_dangerous: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen={} filtered={} emitted={} dropped={} banned={} dangerous={}",
            self.events_seen,
            self.events_filtered,
            self.events_emitted,
            self.events_dropped,
            self.verdicts_banned,
            self.verdicts_dangerous
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_until_reset() {
        let stats = Statistics::new();
        stats.record_seen();
        stats.record_seen();
        stats.record_emitted();
        stats.add_dropped(3);
        stats.record_dangerous();

        let snap = stats.snapshot();
        assert_eq!(snap.events_seen, 2);
        assert_eq!(snap.events_emitted, 1);
        assert_eq!(snap.events_dropped, 3);
        assert_eq!(snap.verdicts_dangerous, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
