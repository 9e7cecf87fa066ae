//! Constitutional validation of a single message.

use std::sync::Arc;
use std::time::Instant;

use agent_bus_types::{BusResult, Message, ValidationResult};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::audit::AuditDispatcher;
use crate::collaborators::{AuditRecord, AuditStage};
use crate::metrics::BusMetrics;
use crate::pii::redact_payload;
use crate::validation::ValidationStrategy;

/// How a message entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Send,
    Broadcast,
}

/// Per-call context for [`MessageProcessor::process_message`].
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub origin: Origin,
    pub received_at: DateTime<Utc>,
}

impl ProcessingContext {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            received_at: Utc::now(),
        }
    }
}

/// Runs the configured strategy, records the verdict and, for accepted
/// messages, redacts PII from the payload.
pub struct MessageProcessor {
    strategy: Arc<ValidationStrategy>,
    audit: Arc<AuditDispatcher>,
    metrics: Arc<BusMetrics>,
    redact_pii: bool,
}

impl MessageProcessor {
    pub fn new(
        strategy: Arc<ValidationStrategy>,
        audit: Arc<AuditDispatcher>,
        metrics: Arc<BusMetrics>,
        redact_pii: bool,
    ) -> Self {
        Self {
            strategy,
            audit,
            metrics,
            redact_pii,
        }
    }

    pub fn strategy(&self) -> &ValidationStrategy {
        &self.strategy
    }

    /// Validate `message`.
    ///
    /// An invalid verdict is returned as `Ok`; the caller decides which
    /// error it becomes. `Err` means no verdict was reached. A valid verdict
    /// is stamped onto the message before redaction runs, so redaction never
    /// changes what was validated.
    #[instrument(
        skip(self, message, ctx),
        fields(message_id = %message.message_id, strategy = self.strategy.name(), origin = ?ctx.origin)
    )]
    pub async fn process_message(
        &self,
        message: &mut Message,
        ctx: &ProcessingContext,
    ) -> BusResult<ValidationResult> {
        let started = Instant::now();
        let verdict = self.strategy.validate(message).await;
        self.metrics.observe_validation(started.elapsed().as_secs_f64());

        let result = match verdict {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "No validation verdict");
                self.audit.decision(
                    AuditRecord::outcome(message, AuditStage::Validation, false).with_error(e.to_string()),
                );
                return Err(e);
            }
        };

        self.audit.decision(AuditRecord::validation(message, &result));
        if !result.is_valid() {
            debug!(errors = ?result.errors(), "Message rejected");
            return Ok(result);
        }

        message.mark_constitutionally_validated(&result)?;

        if self.redact_pii {
            let redacted = redact_payload(&mut message.payload);
            if redacted > 0 {
                self.metrics.record_redactions(redacted);
                debug!(redacted, "PII redacted from payload");
            }
        }

        debug!(
            elapsed_us = (Utc::now() - ctx.received_at).num_microseconds().unwrap_or(i64::MAX),
            "Message validated"
        );
        Ok(result)
    }
}
