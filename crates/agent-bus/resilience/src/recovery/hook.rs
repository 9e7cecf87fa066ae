use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::orchestrator::RecoveryOrchestrator;
use crate::error::{ResilienceError, ResilienceResult};
use crate::health::{HealthChangeListener, SystemHealthReport};

/// Schedules recovery for every open breaker when health turns DEGRADED
/// or CRITICAL.
pub struct AutoRecoveryHook {
    orchestrator: Arc<RecoveryOrchestrator>,
    priority: u32,
}

impl AutoRecoveryHook {
    pub fn new(orchestrator: Arc<RecoveryOrchestrator>, priority: u32) -> Self {
        Self {
            orchestrator,
            priority,
        }
    }
}

#[async_trait]
impl HealthChangeListener for AutoRecoveryHook {
    async fn on_health_change(&self, report: &SystemHealthReport) -> ResilienceResult<()> {
        if !report.status.is_impaired() {
            return Ok(());
        }

        for service in &report.critical_services {
            if self.orchestrator.has_active_recovery(service) {
                continue;
            }
            match self
                .orchestrator
                .schedule_recovery(service, self.priority, None)
            {
                Ok(_) => {
                    info!(service = %service, status = %report.status, "Automatic recovery scheduled")
                }
                Err(ResilienceError::RecoveryAlreadyActive(_)) => {
                    debug!(service = %service, "Recovery became active concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
