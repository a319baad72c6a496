use std::time::{Duration, Instant};

use serde::Serialize;

use crate::model::{ImportRunState, Phase};

/// Snapshot of the run counters plus a short human-readable log line,
/// delivered to the caller's sink after parsed chunks and flushed batches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub last_log: String,
}

impl ProgressEvent {
    pub fn from_state(state: &ImportRunState, last_log: impl Into<String>) -> ProgressEvent {
        ProgressEvent {
            phase: state.phase,
            processed: state.processed,
            total: state.total,
            created: state.created,
            duplicates: state.duplicates,
            errors: state.errors,
            last_log: last_log.into(),
        }
    }
}

/// Caps the emission rate so a tight loop cannot flood a listener; counter
/// increments between emissions coalesce into the next event. Phase
/// transitions and the final event bypass the cap via `force`.
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Throttle {
        Throttle {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, force: bool) -> bool {
        let now = Instant::now();
        match self.last {
            Some(t) if !force && now.duration_since(t) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_coalesces_within_the_interval() {
        let mut t = Throttle::new(Duration::from_millis(40));
        assert!(t.ready(false));
        assert!(!t.ready(false));
        assert!(t.ready(true), "force bypasses the cap");
        std::thread::sleep(Duration::from_millis(50));
        assert!(t.ready(false));
    }

    #[test]
    fn zero_interval_always_emits() {
        let mut t = Throttle::new(Duration::ZERO);
        assert!(t.ready(false));
        assert!(t.ready(false));
    }
}
