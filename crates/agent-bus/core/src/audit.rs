//! Non-blocking audit dispatch.
//!
//! Records go through a bounded channel drained by one background task.
//! Senders never wait: a full channel drops the record, and both drops and
//! sink failures are counted rather than surfaced.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collaborators::{AuditRecord, AuditSink, MetricsEvent};
use crate::metrics::BusMetrics;

/// Unit of work for the audit sink.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    Decision(AuditRecord),
    Metrics(MetricsEvent),
}

pub struct AuditDispatcher {
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<BusMetrics>,
}

impl AuditDispatcher {
    /// Spawn the drain task. Must be called inside a tokio runtime.
    pub fn start(sink: Arc<dyn AuditSink>, capacity: usize, metrics: Arc<BusMetrics>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        let drain_metrics = metrics.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let delivered = match &event {
                    AuditEvent::Decision(record) => {
                        AssertUnwindSafe(sink.log_decision(record)).catch_unwind().await
                    }
                    AuditEvent::Metrics(metric) => {
                        AssertUnwindSafe(sink.record_metrics(metric)).catch_unwind().await
                    }
                };
                match delivered {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        drain_metrics.side_effect_failure("audit_sink");
                        warn!(error = %e, "Audit sink rejected record");
                    }
                    Err(_) => {
                        drain_metrics.side_effect_failure("audit_sink");
                        warn!("Audit sink panicked");
                    }
                }
            }
            debug!("Audit drain finished");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
            metrics,
        }
    }

    /// Queue an event without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, event: AuditEvent) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.metrics.side_effect_failure("audit_closed");
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.side_effect_failure("audit_dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.side_effect_failure("audit_closed");
                false
            }
        }
    }

    pub fn decision(&self, record: AuditRecord) -> bool {
        self.dispatch(AuditEvent::Decision(record))
    }

    pub fn metric(&self, event: MetricsEvent) -> bool {
        self.dispatch(AuditEvent::Metrics(event))
    }

    /// Close the channel and wait up to `timeout` for queued records.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tx.lock().take();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(timeout_ms = timeout.as_millis() as u64, "Audit drain timed out; abandoning");
                task.abort();
            }
        }
    }
}

impl Drop for AuditDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
