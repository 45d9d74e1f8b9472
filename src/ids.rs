//! Identifier generation for messages, runs, threads and confirmations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Millisecond stamps that never repeat and never go backwards, even when
/// several are taken within the same millisecond.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> u64 {
        let now = now_unix_millis();
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(previous.saturating_add(1));
            match self.last.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}

/// Produces `{prefix}-{millis}-{seq}` identifiers.
#[derive(Debug, Default)]
pub struct IdGenerator {
    clock: MonotonicClock,
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, prefix: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{}-{seq}", self.clock.stamp())
    }

    pub fn message_id(&self) -> String {
        self.next("msg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_monotonic_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let stamps: Vec<u64> = (0..1_000).map(|_| clock.stamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_id_generator_prefix_and_uniqueness() {
        let ids = IdGenerator::new();
        let generated: HashSet<String> = (0..500).map(|_| ids.next("run")).collect();
        assert_eq!(generated.len(), 500);
        assert!(generated.iter().all(|id| id.starts_with("run-")));
        assert!(ids.message_id().starts_with("msg-"));
    }
}
