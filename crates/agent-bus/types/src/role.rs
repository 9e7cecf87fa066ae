//! Agent roles and the implement/validate partition.
//!
//! An agent holds exactly one role. Roles that produce work and roles that
//! judge work are drawn from disjoint sets, so an agent can never be both
//! the implementer and the validator of the same unit of work.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role assigned to an agent at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    Executive,
    Legislative,
    Judicial,
    Monitor,
    Auditor,
    Controller,
    Implementer,
}

/// Governance actions gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleAction {
    /// Produce a unit of work (proposal, implementation, task output).
    Implement,
    /// Pass judgement over a unit of work produced by someone else.
    Validate,
    /// Define or amend policy.
    Legislate,
    /// Observe and report without acting.
    Monitor,
    /// Pause, resume or stop other agents.
    Control,
}

impl AgentRole {
    /// Actions this role may perform.
    pub fn allowed_actions(&self) -> &'static [RoleAction] {
        match self {
            AgentRole::Executive => &[RoleAction::Implement],
            AgentRole::Implementer => &[RoleAction::Implement],
            AgentRole::Legislative => &[RoleAction::Legislate],
            AgentRole::Judicial => &[RoleAction::Validate],
            AgentRole::Auditor => &[RoleAction::Validate, RoleAction::Monitor],
            AgentRole::Monitor => &[RoleAction::Monitor],
            AgentRole::Controller => &[RoleAction::Control, RoleAction::Monitor],
        }
    }

    pub fn can(&self, action: RoleAction) -> bool {
        self.allowed_actions().contains(&action)
    }

    pub fn can_implement(&self) -> bool {
        self.can(RoleAction::Implement)
    }

    pub fn can_validate(&self) -> bool {
        self.can(RoleAction::Validate)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentRole::Executive => "EXECUTIVE",
            AgentRole::Legislative => "LEGISLATIVE",
            AgentRole::Judicial => "JUDICIAL",
            AgentRole::Monitor => "MONITOR",
            AgentRole::Auditor => "AUDITOR",
            AgentRole::Controller => "CONTROLLER",
            AgentRole::Implementer => "IMPLEMENTER",
        };
        f.write_str(name)
    }
}

impl fmt::Display for RoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleAction::Implement => "implement",
            RoleAction::Validate => "validate",
            RoleAction::Legislate => "legislate",
            RoleAction::Monitor => "monitor",
            RoleAction::Control => "control",
        };
        f.write_str(name)
    }
}
