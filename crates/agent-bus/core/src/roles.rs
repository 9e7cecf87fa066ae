//! Role separation between implementing and validating agents.
//!
//! [`ImplementerId`] and [`ValidatorId`] can only be obtained through
//! [`RoleGuard`], which checks the agent's registered role. A
//! [`ValidationAssignment`] needs one of each and refuses to pair an agent
//! with itself, so self-validation cannot be expressed.

use agent_bus_types::{AgentId, AgentRole, BusError, BusResult, Message, RoleAction, RoleLabel};
use tracing::warn;

/// An agent proven to hold an implementing role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementerId(AgentId);

impl ImplementerId {
    pub fn agent_id(&self) -> &AgentId {
        &self.0
    }
}

/// An agent proven to hold a validating role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorId(AgentId);

impl ValidatorId {
    pub fn agent_id(&self) -> &AgentId {
        &self.0
    }
}

/// Issues role-checked identities.
pub struct RoleGuard;

impl RoleGuard {
    pub fn implementer(agent_id: &AgentId, role: Option<AgentRole>) -> BusResult<ImplementerId> {
        Self::require(agent_id, role, RoleAction::Implement)?;
        Ok(ImplementerId(agent_id.clone()))
    }

    pub fn validator(agent_id: &AgentId, role: Option<AgentRole>) -> BusResult<ValidatorId> {
        Self::require(agent_id, role, RoleAction::Validate)?;
        Ok(ValidatorId(agent_id.clone()))
    }

    /// Fail unless `role` permits `action`.
    pub fn require(agent_id: &AgentId, role: Option<AgentRole>, action: RoleAction) -> BusResult<()> {
        if role.map(|r| r.can(action)).unwrap_or(false) {
            return Ok(());
        }
        warn!(agent_id = %agent_id, role = %RoleLabel(role), ?action, "Role violation");
        Err(BusError::RoleViolation {
            agent_id: agent_id.clone(),
            role: RoleLabel(role),
            action,
        })
    }

    /// Check a verdict message before dispatch: the sender must hold a
    /// validating role and must not be judging itself.
    ///
    /// A recipient holding an implementing role is the author of the judged
    /// work, so the verdict is bound to it as a [`ValidationAssignment`].
    pub fn check_verdict(
        message: &Message,
        sender_role: Option<AgentRole>,
        recipient_role: Option<AgentRole>,
    ) -> BusResult<Option<ValidationAssignment>> {
        let validator = Self::validator(&message.from_agent, sender_role)?;
        if message.to_agent == message.from_agent {
            warn!(agent_id = %message.from_agent, message_id = %message.message_id, "Self-validation attempt");
            return Err(BusError::SelfValidation {
                agent_id: message.from_agent.clone(),
            });
        }
        match recipient_role.filter(AgentRole::can_implement) {
            Some(role) => {
                let implementer = Self::implementer(&message.to_agent, Some(role))?;
                ValidationAssignment::new(implementer, validator).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// A unit of work paired with the agent that judges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationAssignment {
    implementer: ImplementerId,
    validator: ValidatorId,
}

impl ValidationAssignment {
    pub fn new(implementer: ImplementerId, validator: ValidatorId) -> BusResult<Self> {
        if implementer.0 == validator.0 {
            return Err(BusError::SelfValidation {
                agent_id: implementer.0,
            });
        }
        Ok(Self {
            implementer,
            validator,
        })
    }

    pub fn implementer(&self) -> &ImplementerId {
        &self.implementer
    }

    pub fn validator(&self) -> &ValidatorId {
        &self.validator
    }
}

#[cfg(test)]
mod tests {
    use agent_bus_types::MessageType;

    use super::*;

    #[test]
    fn roles_gate_identities() {
        let agent = AgentId::new("judge");
        assert!(RoleGuard::validator(&agent, Some(AgentRole::Judicial)).is_ok());
        assert!(RoleGuard::validator(&agent, Some(AgentRole::Auditor)).is_ok());
        assert!(RoleGuard::validator(&agent, Some(AgentRole::Executive)).is_err());
        assert!(RoleGuard::validator(&agent, None).is_err());
        assert!(RoleGuard::implementer(&agent, Some(AgentRole::Judicial)).is_err());
    }

    #[test]
    fn no_role_can_both_implement_and_validate() {
        let roles = [
            AgentRole::Executive,
            AgentRole::Legislative,
            AgentRole::Judicial,
            AgentRole::Monitor,
            AgentRole::Auditor,
            AgentRole::Controller,
            AgentRole::Implementer,
        ];
        let agent = AgentId::new("dual");
        for role in roles {
            let both = RoleGuard::implementer(&agent, Some(role)).is_ok()
                && RoleGuard::validator(&agent, Some(role)).is_ok();
            assert!(!both, "{role} holds both sides");
        }
    }

    #[test]
    fn assignment_rejects_identical_agents() {
        let implementer = RoleGuard::implementer(&AgentId::new("a"), Some(AgentRole::Implementer)).unwrap();
        let validator = RoleGuard::validator(&AgentId::new("b"), Some(AgentRole::Judicial)).unwrap();
        let assignment = ValidationAssignment::new(implementer.clone(), validator).unwrap();
        assert_eq!(assignment.implementer().agent_id().as_str(), "a");

        // Same id reached through two registrations with different roles.
        let twin = RoleGuard::validator(&AgentId::new("a"), Some(AgentRole::Auditor)).unwrap();
        let err = ValidationAssignment::new(implementer, twin).unwrap_err();
        assert_eq!(err.error_code(), "SELF_VALIDATION_FORBIDDEN");
    }

    #[test]
    fn verdict_to_self_is_refused() {
        let message = Message::builder("judge", "judge", "tenant-a")
            .message_type(MessageType::ConstitutionalValidation)
            .constitutional_hash("cdd01ef066bc6cf2")
            .build();
        assert!(matches!(
            RoleGuard::check_verdict(&message, Some(AgentRole::Judicial), None),
            Err(BusError::SelfValidation { .. })
        ));
    }

    #[test]
    fn verdict_to_implementer_is_bound_to_it() {
        let message = Message::builder("judge", "builder", "tenant-a")
            .message_type(MessageType::GovernanceResponse)
            .constitutional_hash("cdd01ef066bc6cf2")
            .build();

        let assignment =
            RoleGuard::check_verdict(&message, Some(AgentRole::Auditor), Some(AgentRole::Implementer))
                .unwrap()
                .unwrap();
        assert_eq!(assignment.implementer().agent_id().as_str(), "builder");
        assert_eq!(assignment.validator().agent_id().as_str(), "judge");

        let unbound =
            RoleGuard::check_verdict(&message, Some(AgentRole::Auditor), Some(AgentRole::Monitor)).unwrap();
        assert!(unbound.is_none());

        assert!(RoleGuard::check_verdict(&message, Some(AgentRole::Executive), Some(AgentRole::Implementer)).is_err());
    }
}
