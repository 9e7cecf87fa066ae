use std::sync::atomic::{AtomicU64, Ordering};

use agent_bus_types::{Message, ValidationResult};

use super::{hash_mismatch, StrategyKind};

/// Static hash check on precomputed BLAKE3 digests.
///
/// The expected digest is computed once; each message costs one hash of
/// its claimed value and a constant-time digest comparison, so response
/// timing does not reveal how much of a guessed hash was right.
pub struct AcceleratedStrategy {
    expected_hash: String,
    expected_digest: blake3::Hash,
    evaluations: AtomicU64,
}

impl AcceleratedStrategy {
    pub fn new(expected_hash: impl Into<String>) -> Self {
        let expected_hash = expected_hash.into();
        let expected_digest = blake3::hash(expected_hash.as_bytes());
        Self {
            expected_hash,
            expected_digest,
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn validate(&self, message: &Message) -> ValidationResult {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        // blake3::Hash equality is constant-time.
        if blake3::hash(message.constitutional_hash.as_bytes()) == self.expected_digest {
            ValidationResult::valid(message.constitutional_hash.clone())
                .with_metadata("strategy", StrategyKind::Accelerated.as_str().into())
        } else {
            hash_mismatch(message, &self.expected_hash, StrategyKind::Accelerated)
        }
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }
}
