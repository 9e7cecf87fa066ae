//! Per-tenant agent registry.

use std::collections::{BTreeSet, HashMap};

use agent_bus_types::{AgentId, AgentRole, BusError, BusResult, TenantId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub role: Option<AgentRole>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentRegistration {
    pub fn new(agent_id: impl Into<AgentId>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tenant_id: tenant_id.into(),
            capabilities: BTreeSet::new(),
            role: None,
            metadata: HashMap::new(),
        }
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn role(mut self, role: AgentRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    pub capabilities: BTreeSet<String>,
    pub role: Option<AgentRole>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Agents keyed by (tenant, agent). The same agent id may exist in several
/// tenants independently.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<(TenantId, AgentId), AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: AgentRegistration) -> BusResult<AgentRecord> {
        let mut problems = Vec::new();
        if registration.agent_id.is_empty() {
            problems.push("agent_id must not be empty");
        }
        if registration.tenant_id.is_empty() {
            problems.push("tenant_id must not be empty");
        }
        if !problems.is_empty() {
            return Err(BusError::config("agent", problems.join("; ")));
        }

        let key = (registration.tenant_id.clone(), registration.agent_id.clone());
        match self.agents.entry(key) {
            Entry::Occupied(_) => Err(BusError::AgentAlreadyRegistered {
                agent_id: registration.agent_id,
                tenant_id: registration.tenant_id,
            }),
            Entry::Vacant(slot) => {
                let record = AgentRecord {
                    agent_id: registration.agent_id,
                    tenant_id: registration.tenant_id,
                    capabilities: registration.capabilities,
                    role: registration.role,
                    metadata: registration.metadata,
                    registered_at: Utc::now(),
                };
                info!(
                    agent_id = %record.agent_id,
                    tenant_id = %record.tenant_id,
                    role = ?record.role,
                    "Agent registered"
                );
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    pub fn unregister(&self, tenant_id: &TenantId, agent_id: &AgentId) -> BusResult<AgentRecord> {
        self.agents
            .remove(&(tenant_id.clone(), agent_id.clone()))
            .map(|(_, record)| {
                info!(agent_id = %agent_id, tenant_id = %tenant_id, "Agent unregistered");
                record
            })
            .ok_or_else(|| BusError::AgentNotRegistered {
                agent_id: agent_id.clone(),
                tenant_id: tenant_id.clone(),
            })
    }

    pub fn get(&self, tenant_id: &TenantId, agent_id: &AgentId) -> Option<AgentRecord> {
        self.agents
            .get(&(tenant_id.clone(), agent_id.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Like [`get`](Self::get) but failing with `AgentNotRegistered`.
    pub fn require(&self, tenant_id: &TenantId, agent_id: &AgentId) -> BusResult<AgentRecord> {
        self.get(tenant_id, agent_id)
            .ok_or_else(|| BusError::AgentNotRegistered {
                agent_id: agent_id.clone(),
                tenant_id: tenant_id.clone(),
            })
    }

    /// Agents of one tenant, sorted by id.
    pub fn list(&self, tenant_id: &TenantId) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self
            .agents
            .iter()
            .filter(|entry| &entry.key().0 == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
