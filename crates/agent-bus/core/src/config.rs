//! Bus configuration.

use std::collections::HashMap;

use agent_bus_resilience::{ChaosConfig, CircuitBreakerConfig, HealthConfig, RecoveryConfig};
use agent_bus_types::{BusError, BusResult, MessageType};
use serde::{Deserialize, Serialize};

use crate::validation::{CompositeMode, StrategyKind};

/// Constitutional hash deployments start from unless they configure another.
pub const DEFAULT_CONSTITUTIONAL_HASH: &str = "cdd01ef066bc6cf2";

/// What to do when the policy registry cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryFallback {
    /// Validate against the configured static hash and record a warning.
    StaticHash,
    /// Fail validation.
    Deny,
}

/// Top-level bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Expected constitutional hash.
    pub constitutional_hash: String,

    /// Treat every policy registry failure as a validation failure.
    pub policy_fail_closed: bool,

    /// Applied when the registry is unreachable and not failing closed.
    pub registry_unreachable_fallback: RegistryFallback,

    /// Applied when the registry answers with an error and not failing closed.
    pub registry_error_policy: RegistryFallback,

    /// Impact scores at or above this go to deliberation.
    pub deliberation_threshold: f64,

    /// Deadline for `send_message` when the caller gives none.
    pub default_timeout_ms: u64,

    /// Deadline for a deliberation decision.
    pub deliberation_timeout_ms: u64,

    /// Messages processed concurrently across all conversations.
    pub max_concurrent_messages: usize,

    pub enable_pii_redaction: bool,

    /// Check sender roles on validation verdict messages.
    pub enforce_roles: bool,

    /// Capability a recipient must declare to receive a message type.
    pub required_capability: HashMap<MessageType, String>,

    pub validation: ValidationConfig,
    pub health: HealthConfig,
    pub recovery: RecoveryConfig,
    pub chaos: ChaosConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub audit: AuditConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            constitutional_hash: DEFAULT_CONSTITUTIONAL_HASH.to_string(),
            policy_fail_closed: false,
            registry_unreachable_fallback: RegistryFallback::StaticHash,
            registry_error_policy: RegistryFallback::Deny,
            deliberation_threshold: 0.8,
            default_timeout_ms: 5_000,
            deliberation_timeout_ms: 300_000,
            max_concurrent_messages: 1_024,
            enable_pii_redaction: true,
            enforce_roles: true,
            required_capability: HashMap::new(),
            validation: ValidationConfig::default(),
            health: HealthConfig::default(),
            recovery: RecoveryConfig::default(),
            chaos: ChaosConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl BusConfig {
    /// Config with the given expected hash and defaults elsewhere.
    pub fn with_hash(constitutional_hash: impl Into<String>) -> Self {
        Self {
            constitutional_hash: constitutional_hash.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> BusResult<()> {
        if self.constitutional_hash.trim().is_empty() {
            return Err(BusError::config("constitutional_hash", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.deliberation_threshold) {
            return Err(BusError::config(
                "deliberation_threshold",
                format!("must be within [0, 1], got {}", self.deliberation_threshold),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(BusError::config("default_timeout_ms", "must be positive"));
        }
        if self.deliberation_timeout_ms == 0 {
            return Err(BusError::config("deliberation_timeout_ms", "must be positive"));
        }
        if self.max_concurrent_messages == 0 {
            return Err(BusError::config("max_concurrent_messages", "must be positive"));
        }
        if self.audit.channel_capacity == 0 {
            return Err(BusError::config("audit.channel_capacity", "must be positive"));
        }
        self.validation.validate()?;

        self.health
            .validate()
            .map_err(|e| BusError::config("health", e.to_string()))?;
        self.recovery
            .validate()
            .map_err(|e| BusError::config("recovery", e.to_string()))?;
        self.chaos
            .validate()
            .map_err(|e| BusError::config("chaos", e.to_string()))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| BusError::config("circuit_breaker", e.to_string()))?;
        Ok(())
    }
}

/// Which validation strategy the bus builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub strategy: StrategyKind,

    /// Members of a composite strategy, in evaluation order.
    pub composite: Vec<StrategyKind>,
    pub composite_mode: CompositeMode,

    /// Policy evaluated by the external policy engine.
    pub policy_path: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Static,
            composite: Vec::new(),
            composite_mode: CompositeMode::FailFast,
            policy_path: "agent_bus/constitutional/allow".to_string(),
        }
    }
}

impl ValidationConfig {
    fn validate(&self) -> BusResult<()> {
        if self.strategy == StrategyKind::Composite {
            if self.composite.is_empty() {
                return Err(BusError::config(
                    "validation.composite",
                    "composite strategy needs at least one member",
                ));
            }
            if self.composite.contains(&StrategyKind::Composite) {
                return Err(BusError::config(
                    "validation.composite",
                    "composite members cannot themselves be composite",
                ));
            }
        }
        if self.policy_path.trim().is_empty() {
            return Err(BusError::config("validation.policy_path", "must not be empty"));
        }
        Ok(())
    }
}

/// Audit dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered before new ones are dropped.
    pub channel_capacity: usize,

    /// How long `stop` waits for buffered records to drain.
    pub drain_timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
            drain_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deliberation_threshold, 0.8);
        assert_eq!(config.health.degraded_threshold, 0.7);
        assert_eq!(config.health.critical_threshold, 0.5);
        assert_eq!(config.registry_unreachable_fallback, RegistryFallback::StaticHash);
        assert_eq!(config.registry_error_policy, RegistryFallback::Deny);
    }

    #[test]
    fn empty_hash_is_rejected() {
        let err = BusConfig::with_hash("  ").validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let config = BusConfig {
            deliberation_threshold: 1.2,
            ..BusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BusError::Configuration { key, .. }) if key == "deliberation_threshold"
        ));
    }

    #[test]
    fn nested_errors_name_their_section() {
        let mut config = BusConfig::default();
        config.recovery.initial_delay_ms = 10_000;
        config.recovery.max_delay_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(BusError::Configuration { key, .. }) if key == "recovery"
        ));
    }

    #[test]
    fn composite_needs_members() {
        let mut config = BusConfig::default();
        config.validation.strategy = StrategyKind::Composite;
        assert!(config.validate().is_err());

        config.validation.composite = vec![StrategyKind::Static, StrategyKind::Accelerated];
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: BusConfig = serde_json::from_str(
            r#"{"constitutional_hash":"abc123","required_capability":{"GOVERNANCE_REQUEST":"governance"}}"#,
        )
        .unwrap();
        assert_eq!(config.constitutional_hash, "abc123");
        assert_eq!(config.default_timeout_ms, 5_000);
        assert_eq!(
            config.required_capability.get(&MessageType::GovernanceRequest).map(String::as_str),
            Some("governance")
        );
    }
}
