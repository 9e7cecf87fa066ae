//! Tracking of messages handed to deliberation.

use agent_bus_types::{MessageId, MessageStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Where a deliberation stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliberationOutcome {
    Pending,
    Approved,
    Rejected { reason: String },
    TimedOut,
    Failed { error: String },
}

impl DeliberationOutcome {
    pub fn is_decided(&self) -> bool {
        !matches!(self, DeliberationOutcome::Pending)
    }

    /// Message status implied by this outcome.
    pub fn message_status(&self) -> MessageStatus {
        match self {
            DeliberationOutcome::Pending => MessageStatus::PendingDeliberation,
            DeliberationOutcome::Approved => MessageStatus::Delivered,
            _ => MessageStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationRecord {
    pub message_id: MessageId,
    pub outcome: DeliberationOutcome,
    pub status: MessageStatus,
    pub impact_score: Option<f64>,
    pub queued_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Deliberations in flight and recently decided.
///
/// Decided records beyond `retain_decided` are evicted oldest-first.
pub struct DeliberationTracker {
    records: DashMap<MessageId, DeliberationRecord>,
    tasks: DashMap<MessageId, JoinHandle<()>>,
    retain_decided: usize,
}

impl DeliberationTracker {
    pub fn new(retain_decided: usize) -> Self {
        Self {
            records: DashMap::new(),
            tasks: DashMap::new(),
            retain_decided,
        }
    }

    pub fn begin(&self, message_id: MessageId, impact_score: Option<f64>) {
        self.records.insert(
            message_id,
            DeliberationRecord {
                message_id,
                outcome: DeliberationOutcome::Pending,
                status: MessageStatus::PendingDeliberation,
                impact_score,
                queued_at: Utc::now(),
                decided_at: None,
            },
        );
    }

    pub fn attach_task(&self, message_id: MessageId, task: JoinHandle<()>) {
        // The task may already have finished and decided.
        let decided = self
            .records
            .get(&message_id)
            .map(|r| r.outcome.is_decided())
            .unwrap_or(true);
        if !decided {
            self.tasks.insert(message_id, task);
        }
    }

    /// Record the outcome. A decided deliberation is never decided again.
    pub fn decide(&self, message_id: MessageId, outcome: DeliberationOutcome) -> bool {
        let updated = match self.records.get_mut(&message_id) {
            Some(mut record) if !record.outcome.is_decided() => {
                record.status = outcome.message_status();
                record.outcome = outcome;
                record.decided_at = Some(Utc::now());
                true
            }
            _ => false,
        };
        self.tasks.remove(&message_id);
        if updated {
            self.evict_decided();
        }
        updated
    }

    pub fn get(&self, message_id: &MessageId) -> Option<DeliberationRecord> {
        self.records.get(message_id).map(|r| r.value().clone())
    }

    pub fn pending(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.outcome.is_decided())
            .count()
    }

    /// Abort every pending deliberation, marking it failed.
    pub fn abort_all(&self, reason: &str) -> usize {
        let ids: Vec<MessageId> = self.tasks.iter().map(|t| *t.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                task.abort();
            }
            if self.decide(
                id,
                DeliberationOutcome::Failed {
                    error: reason.to_string(),
                },
            ) {
                aborted += 1;
            }
        }
        aborted
    }

    fn evict_decided(&self) {
        let mut decided: Vec<(DateTime<Utc>, MessageId)> = self
            .records
            .iter()
            .filter_map(|r| r.decided_at.map(|at| (at, r.message_id)))
            .collect();
        if decided.len() <= self.retain_decided {
            return;
        }
        decided.sort();
        let excess = decided.len() - self.retain_decided;
        for (_, id) in decided.into_iter().take(excess) {
            self.records.remove(&id);
        }
    }
}
