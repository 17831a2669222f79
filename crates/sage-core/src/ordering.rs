//! Ordering tracker (C4): per-session monotonic `(sequence, timestamp)`
//! enforcement, plus the single process-wide monotonic sequence generator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::{Mutex, RwLock};

use crate::error::SageError;

/// The only process-wide mutable state in the core (spec §9): a bare atomic
/// counter, not a singleton object.
static GLOBAL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next value from the process-wide monotonic sequence generator.
pub fn next_sequence() -> u64 {
    GLOBAL_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed)
}

struct SessionOrder {
    last_sequence: u64,
    last_timestamp: i64,
}

/// `session_id -> (last_sequence, last_timestamp)`.
#[derive(Default)]
pub struct OrderingTracker {
    sessions: RwLock<HashMap<String, Mutex<SessionOrder>>>,
}

impl OrderingTracker {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Enforces strict advancement of both `sequence` and `timestamp` for a
    /// given session. The first observation for a session always succeeds
    /// (there is no prior state to violate).
    pub fn observe(&self, session_id: &str, sequence: u64, timestamp: i64) -> Result<(), SageError> {
        if timestamp == 0 {
            return Err(SageError::EmptyTimestamp);
        }

        // Read-biased lookup; only take the write lock to insert a new entry.
        {
            let sessions = self.sessions.read();
            if let Some(state) = sessions.get(session_id) {
                let mut state = state.lock();
                if sequence <= state.last_sequence {
                    return Err(SageError::OutOfOrderSeq);
                }
                if timestamp < state.last_timestamp {
                    return Err(SageError::OutOfOrderTime);
                }
                state.last_sequence = sequence;
                state.last_timestamp = timestamp;
                return Ok(());
            }
        }

        let mut sessions = self.sessions.write();
        // Double-checked: another thread may have inserted this session
        // while we waited for the write lock.
        let state = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Mutex::new(SessionOrder {
                    last_sequence: 0,
                    last_timestamp: i64::MIN,
                })
            });
        let mut state = state.lock();
        if sequence <= state.last_sequence {
            return Err(SageError::OutOfOrderSeq);
        }
        if timestamp < state.last_timestamp {
            return Err(SageError::OutOfOrderTime);
        }
        state.last_sequence = sequence;
        state.last_timestamp = timestamp;
        Ok(())
    }

    pub fn forget(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_scenario_from_spec() {
        let tracker = OrderingTracker::new();
        let t = 1_000_000i64;
        assert!(tracker.observe("S", 1, t).is_ok());
        assert!(matches!(
            tracker.observe("S", 1, t + 1),
            Err(SageError::OutOfOrderSeq)
        ));
        assert!(matches!(
            tracker.observe("S", 2, t - 1),
            Err(SageError::OutOfOrderTime)
        ));
        assert!(tracker.observe("S", 2, t + 1).is_ok());
    }

    #[test]
    fn zero_timestamp_is_rejected() {
        let tracker = OrderingTracker::new();
        assert!(matches!(
            tracker.observe("S", 1, 0),
            Err(SageError::EmptyTimestamp)
        ));
    }

    #[test]
    fn sessions_are_independent() {
        let tracker = OrderingTracker::new();
        assert!(tracker.observe("A", 5, 100).is_ok());
        assert!(tracker.observe("B", 1, 1).is_ok());
    }

    #[test]
    fn global_sequence_is_monotonic() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }
}
