use agent_bus_types::{Message, ValidationResult};

use super::{hash_mismatch, StrategyKind};

/// Byte-for-byte comparison against the configured hash. No I/O; the
/// default strategy and the fallback when a registry cannot be used.
#[derive(Debug, Clone)]
pub struct StaticHashStrategy {
    expected_hash: String,
}

impl StaticHashStrategy {
    pub fn new(expected_hash: impl Into<String>) -> Self {
        Self {
            expected_hash: expected_hash.into(),
        }
    }

    pub fn expected_hash(&self) -> &str {
        &self.expected_hash
    }

    pub fn validate(&self, message: &Message) -> ValidationResult {
        if message.constitutional_hash.as_bytes() == self.expected_hash.as_bytes() {
            ValidationResult::valid(message.constitutional_hash.clone())
                .with_metadata("strategy", StrategyKind::Static.as_str().into())
        } else {
            hash_mismatch(message, &self.expected_hash, StrategyKind::Static)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::mismatched_hash;
    use crate::validation::testing::{message_with_hash, HASH};

    #[test]
    fn exact_hash_passes() {
        let result = StaticHashStrategy::new(HASH).validate(&message_with_hash(HASH));
        assert!(result.is_valid());
        assert_eq!(result.constitutional_hash(), HASH);
    }

    #[test]
    fn mismatch_is_sanitized() {
        let result =
            StaticHashStrategy::new(HASH).validate(&message_with_hash("deadbeef<script>cafebabe"));
        assert!(!result.is_valid());
        assert_eq!(mismatched_hash(&result), Some(HASH));
        assert!(!result.errors()[0].contains("<script>"));
        assert!(result.errors()[0].contains("deadbeef..."));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let result = StaticHashStrategy::new(HASH).validate(&message_with_hash(&HASH.to_uppercase()));
        assert!(!result.is_valid());
    }
}
