//! Message validator (C5): composes the replay caches (C3) and ordering
//! tracker (C4) with a clock-skew check into one admit/reject verdict.

use std::sync::Arc;
use std::time::Duration;

use sage_proto::ValidatorConfig;

use crate::error::SageError;
use crate::ordering::OrderingTracker;
use crate::periodic::spawn_periodic;
use crate::replay::{FingerprintCache, NonceCache};

/// The fields of an inbound message the validator needs; everything else
/// about the message is opaque to it.
pub struct ValidationRequest<'a> {
    pub session_id: &'a str,
    pub key_id: &'a str,
    pub nonce: &'a [u8],
    pub sequence: u64,
    pub timestamp: i64,
    pub fingerprint: &'a [u8],
}

pub struct MessageValidator {
    nonce_cache: NonceCache,
    fingerprint_cache: FingerprintCache,
    ordering: OrderingTracker,
    timestamp_tolerance: Duration,
}

impl MessageValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            nonce_cache: NonceCache::new(Duration::from_secs(config.nonce_ttl_secs)),
            fingerprint_cache: FingerprintCache::new(Duration::from_secs(config.duplicate_ttl_secs)),
            ordering: OrderingTracker::new(),
            timestamp_tolerance: Duration::from_secs(config.timestamp_tolerance_secs),
        }
    }

    /// Runs the five-step pipeline of spec §4.5. On any failure, returns
    /// immediately — later steps neither run nor mutate state.
    pub fn validate(&self, req: &ValidationRequest, now: i64) -> Result<(), SageError> {
        // 1. Clock skew.
        let skew = (now - req.timestamp).unsigned_abs();
        if skew > self.timestamp_tolerance.as_secs() {
            return Err(SageError::ClockSkew);
        }

        // 2. Nonce freshness.
        if self.nonce_cache.seen_or_record(req.key_id, req.nonce) {
            return Err(SageError::Replay);
        }

        // 3. Duplicate.
        if self.fingerprint_cache.seen_or_record(req.fingerprint) {
            return Err(SageError::Duplicate);
        }

        // 4. Ordering.
        self.ordering.observe(req.session_id, req.sequence, req.timestamp)?;

        // 5. Commit: steps 2 and 3 already recorded their state; there is
        // nothing left to do but signal success.
        Ok(())
    }

    /// Current wall-clock time as the `now` argument to [`Self::validate`].
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn forget_session(&self, key_id: &str, session_id: &str) {
        self.nonce_cache.forget(key_id);
        self.ordering.forget(session_id);
    }

    /// Spawn the background sweeper that expires replay-cache entries on
    /// `cleanup_interval` (default 60 s).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        spawn_periodic(interval, move || {
            this.nonce_cache.sweep();
            this.fingerprint_cache.sweep();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req<'a>(fp: &'a [u8], nonce: &'a [u8]) -> ValidationRequest<'a> {
        ValidationRequest {
            session_id: "S",
            key_id: "K",
            nonce,
            sequence: 1,
            timestamp: 1_000,
            fingerprint: fp,
        }
    }

    #[test]
    fn accepts_a_fresh_message() {
        let validator = MessageValidator::new(ValidatorConfig::default());
        assert!(validator.validate(&req(b"fp1", b"n1"), 1_000).is_ok());
    }

    #[test]
    fn rejects_clock_skew() {
        let validator = MessageValidator::new(ValidatorConfig::default());
        assert!(matches!(
            validator.validate(&req(b"fp1", b"n1"), 1_000 + 10_000),
            Err(SageError::ClockSkew)
        ));
    }

    #[test]
    fn rejects_replayed_nonce() {
        let validator = MessageValidator::new(ValidatorConfig::default());
        assert!(validator
            .validate(
                &ValidationRequest {
                    session_id: "S",
                    key_id: "K",
                    nonce: b"n1",
                    sequence: 1,
                    timestamp: 1_000,
                    fingerprint: b"fp1",
                },
                1_000
            )
            .is_ok());
        assert!(matches!(
            validator.validate(
                &ValidationRequest {
                    session_id: "S",
                    key_id: "K",
                    nonce: b"n1",
                    sequence: 2,
                    timestamp: 1_001,
                    fingerprint: b"fp2",
                },
                1_000
            ),
            Err(SageError::Replay)
        ));
    }

    #[test]
    fn rejects_duplicate_fingerprint() {
        let validator = MessageValidator::new(ValidatorConfig::default());
        assert!(validator
            .validate(
                &ValidationRequest {
                    session_id: "S",
                    key_id: "K",
                    nonce: b"n1",
                    sequence: 1,
                    timestamp: 1_000,
                    fingerprint: b"fp1",
                },
                1_000
            )
            .is_ok());
        assert!(matches!(
            validator.validate(
                &ValidationRequest {
                    session_id: "S",
                    key_id: "K",
                    nonce: b"n2",
                    sequence: 2,
                    timestamp: 1_001,
                    fingerprint: b"fp1",
                },
                1_000
            ),
            Err(SageError::Duplicate)
        ));
    }

    #[test]
    fn rejects_out_of_order_sequence() {
        let validator = MessageValidator::new(ValidatorConfig::default());
        assert!(validator.validate(&req(b"fp1", b"n1"), 1_000).is_ok());
        assert!(matches!(
            validator.validate(
                &ValidationRequest {
                    session_id: "S",
                    key_id: "K",
                    nonce: b"n2",
                    sequence: 1,
                    timestamp: 1_001,
                    fingerprint: b"fp2",
                },
                1_000
            ),
            Err(SageError::OutOfOrderSeq)
        ));
    }
}
