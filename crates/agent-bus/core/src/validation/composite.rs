use agent_bus_types::{BusResult, Message, ValidationResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{StaticHashStrategy, ValidationStrategy};

/// How a composite reacts to a failing member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Stop at the first failing member.
    #[default]
    FailFast,
    /// Run every member and aggregate all errors.
    FailSlow,
}

/// Ordered chain of strategies.
///
/// An unreachable member fails the chain when `fail_closed` is set;
/// otherwise its verdict is replaced by a static comparison against the
/// configured hash, with a warning. Any other member error is returned as
/// is. A chain with no members never validates anything.
pub struct CompositeStrategy {
    members: Vec<ValidationStrategy>,
    mode: CompositeMode,
    fail_closed: bool,
    fallback: StaticHashStrategy,
}

impl CompositeStrategy {
    pub fn new(
        members: Vec<ValidationStrategy>,
        mode: CompositeMode,
        expected_hash: impl Into<String>,
    ) -> Self {
        Self {
            members,
            mode,
            fail_closed: true,
            fallback: StaticHashStrategy::new(expected_hash),
        }
    }

    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    pub fn members(&self) -> &[ValidationStrategy] {
        &self.members
    }

    pub async fn validate(&self, message: &Message) -> BusResult<ValidationResult> {
        let checked = message.constitutional_hash.clone();
        if self.members.is_empty() {
            return Ok(ValidationResult::invalid(
                checked,
                vec!["composite strategy has no members".into()],
            ));
        }

        let mut parts = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let part = match member.validate(message).await {
                Ok(part) => part,
                Err(e) if e.is_unavailability() && !self.fail_closed => {
                    warn!(
                        message_id = %message.message_id,
                        strategy = member.name(),
                        error = %e,
                        "Validation strategy unreachable, falling back to static hash"
                    );
                    self.fallback
                        .validate(message)
                        .with_warning(format!("{} skipped: {e}", member.name()))
                }
                Err(e) if e.is_unavailability() => ValidationResult::invalid(
                    checked.clone(),
                    vec![format!("{} unavailable: {e}", member.name())],
                ),
                Err(e) => return Err(e),
            };

            let failed = !part.is_valid();
            parts.push(part);
            if failed && self.mode == CompositeMode::FailFast {
                break;
            }
        }

        let evaluated = parts.len();
        Ok(ValidationResult::aggregate(checked, parts)
            .with_metadata("strategy", "composite".into())
            .with_metadata("members_evaluated", evaluated.into()))
    }
}
