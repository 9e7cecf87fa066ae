//! Priority-ordered recovery scheduling.
//!
//! Services are keyed by name. A min-heap ordered by due time drives the
//! next attempt; entries carry the service's generation at push time so
//! cancelled or rescheduled work is discarded lazily when popped. At most
//! one attempt per service runs at a time.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::state::{RecoveryEvent, RecoveryState, RecoveryStatus};
use super::strategy::{RecoveryPolicy, RecoveryStrategy};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::RecoveryConfig;
use crate::error::{ResilienceError, ResilienceResult};

struct ServiceEntry {
    policy: RecoveryPolicy,
    status: RecoveryStatus,
    generation: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct DueEntry {
    due: Instant,
    priority: u32,
    seq: u64,
    service: String,
    generation: u64,
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then(self.priority.cmp(&other.priority))
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Marks a service as having an attempt in flight for the guard's lifetime.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    service: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.service);
    }
}

/// Drives degraded services through scheduled recovery attempts.
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    services: DashMap<String, ServiceEntry>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    queue: Mutex<BinaryHeap<Reverse<DueEntry>>>,
    in_flight: Mutex<HashSet<String>>,
    seq: AtomicU64,
    events: broadcast::Sender<RecoveryEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryOrchestrator {
    pub fn new(config: RecoveryConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config,
            services: DashMap::new(),
            breakers: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            in_flight: Mutex::new(HashSet::new()),
            seq: AtomicU64::new(0),
            events,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Breaker reset to closed when its service recovers.
    pub fn register_circuit_breaker(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(name.into(), breaker);
    }

    /// Record the policy a service recovers under without scheduling it.
    ///
    /// The policy is used by later `schedule_recovery` calls that pass
    /// `None`. An active recovery keeps the policy it started with.
    pub fn register_service(&self, service_name: &str, policy: RecoveryPolicy) {
        let now = Utc::now();
        let mut entry = self
            .services
            .entry(service_name.to_string())
            .or_insert_with(|| ServiceEntry {
                policy: policy.clone(),
                status: RecoveryStatus {
                    service_name: service_name.to_string(),
                    state: RecoveryState::Idle,
                    strategy: policy.strategy,
                    priority: self.config.default_priority,
                    attempt_count: 0,
                    max_retry_attempts: policy.max_retry_attempts,
                    next_attempt_at: None,
                    last_attempt_at: None,
                    last_error: None,
                    scheduled_at: now,
                    updated_at: now,
                },
                generation: 0,
            });
        if !entry.status.state.is_active() {
            entry.status.strategy = policy.strategy;
            entry.status.max_retry_attempts = policy.max_retry_attempts;
            entry.policy = policy;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events.subscribe()
    }

    /// Start the scheduling loop.
    pub fn start(self: &Arc<Self>) -> ResilienceResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(ResilienceError::AlreadyRunning("recovery orchestrator"));
        }

        let weak = Arc::downgrade(self);
        let period = self.config.tick_interval();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                orchestrator.process_due();
            }
        }));

        info!(tick_ms = self.config.tick_interval_ms, "Recovery orchestrator started");
        Ok(())
    }

    /// Stop the scheduling loop. Idempotent; in-flight attempts finish.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Recovery orchestrator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Schedule recovery for a service.
    ///
    /// Without an explicit policy the service keeps its previous policy, or
    /// gets the configured defaults on first use. A MANUAL policy moves the
    /// service straight to AWAITING_MANUAL.
    #[instrument(skip(self, policy), fields(service = %service_name))]
    pub fn schedule_recovery(
        &self,
        service_name: &str,
        priority: u32,
        policy: Option<RecoveryPolicy>,
    ) -> ResilienceResult<RecoveryStatus> {
        let now = Utc::now();

        let (status, due) = {
            let mut entry = self
                .services
                .entry(service_name.to_string())
                .or_insert_with(|| ServiceEntry {
                    policy: RecoveryPolicy::from_config(&self.config),
                    status: RecoveryStatus {
                        service_name: service_name.to_string(),
                        state: RecoveryState::Idle,
                        strategy: self.config.default_strategy,
                        priority,
                        attempt_count: 0,
                        max_retry_attempts: self.config.max_retry_attempts,
                        next_attempt_at: None,
                        last_attempt_at: None,
                        last_error: None,
                        scheduled_at: now,
                        updated_at: now,
                    },
                    generation: 0,
                });

            if entry.status.state.is_active() {
                return Err(ResilienceError::RecoveryAlreadyActive(
                    service_name.to_string(),
                ));
            }

            let entry: &mut ServiceEntry = &mut entry;
            if let Some(policy) = policy {
                entry.policy = policy;
            }
            entry.generation += 1;

            let manual = entry.policy.strategy == RecoveryStrategy::Manual;
            let status = &mut entry.status;
            status.state = if manual {
                RecoveryState::AwaitingManual
            } else {
                RecoveryState::Scheduled
            };
            status.strategy = entry.policy.strategy;
            status.priority = priority;
            status.attempt_count = 0;
            status.max_retry_attempts = entry.policy.max_retry_attempts;
            status.next_attempt_at = if manual { None } else { Some(now) };
            status.last_error = None;
            status.scheduled_at = now;
            status.updated_at = now;

            let generation = entry.generation;
            let due = (!manual).then(|| self.due_entry(service_name, priority, generation, 0));
            (entry.status.clone(), due)
        };

        match due {
            Some(due) => {
                self.queue.lock().push(Reverse(due));
                info!(service = %service_name, priority, strategy = %status.strategy, "Recovery scheduled");
                self.emit(RecoveryEvent::Scheduled {
                    service: service_name.to_string(),
                    priority,
                });
            }
            None => {
                info!(service = %service_name, "Recovery awaiting manual action");
                self.emit(RecoveryEvent::AwaitingManual {
                    service: service_name.to_string(),
                });
            }
        }

        Ok(status)
    }

    /// Run one recovery attempt for a scheduled service.
    #[instrument(skip(self), fields(service = %service_name))]
    pub async fn execute_recovery(&self, service_name: &str) -> ResilienceResult<RecoveryState> {
        let guard = self.claim(service_name)?;

        let (attempt, generation, check) = {
            let mut entry = self
                .services
                .get_mut(service_name)
                .ok_or_else(|| ResilienceError::RecoveryNotActive(service_name.to_string()))?;
            if entry.status.state != RecoveryState::Scheduled {
                return Err(ResilienceError::RecoveryNotActive(service_name.to_string()));
            }
            let now = Utc::now();
            entry.status.state = RecoveryState::InProgress;
            entry.status.next_attempt_at = None;
            entry.status.last_attempt_at = Some(now);
            entry.status.updated_at = now;
            (
                entry.status.attempt_count + 1,
                entry.generation,
                entry.policy.health_check.clone(),
            )
        };

        debug!(service = %service_name, attempt, "Recovery attempt started");
        self.emit(RecoveryEvent::AttemptStarted {
            service: service_name.to_string(),
            attempt,
        });

        let failure = match check {
            None => None,
            Some(check) => {
                let probe = AssertUnwindSafe(check.check()).catch_unwind();
                match tokio::time::timeout(self.config.health_check_timeout(), probe).await {
                    Ok(Ok(true)) => None,
                    Ok(Ok(false)) => Some("health check failed".to_string()),
                    Ok(Err(_)) => Some("health check panicked".to_string()),
                    Err(_) => Some(format!(
                        "health check timed out after {}ms",
                        self.config.health_check_timeout_ms
                    )),
                }
            }
        };

        let (state, retry) = {
            let mut entry = self
                .services
                .get_mut(service_name)
                .ok_or_else(|| ResilienceError::RecoveryNotActive(service_name.to_string()))?;

            // Cancelled or rescheduled while the attempt ran.
            if entry.generation != generation || entry.status.state != RecoveryState::InProgress {
                return Ok(entry.status.state);
            }

            let now = Utc::now();
            entry.status.updated_at = now;

            match failure {
                None => {
                    entry.status.state = RecoveryState::Succeeded;
                    entry.status.last_error = None;
                    (RecoveryState::Succeeded, None)
                }
                Some(reason) => {
                    entry.status.attempt_count += 1;
                    entry.status.last_error = Some(reason.clone());
                    let attempts = entry.status.attempt_count;

                    if attempts >= entry.policy.max_retry_attempts {
                        entry.status.state = RecoveryState::Failed;
                        warn!(service = %service_name, attempts, error = %reason, "Recovery failed; attempts exhausted");
                        (RecoveryState::Failed, None)
                    } else {
                        let delay_ms = entry.policy.delay_after(attempts).unwrap_or(0);
                        entry.status.state = RecoveryState::Scheduled;
                        entry.status.next_attempt_at = chrono::Duration::try_milliseconds(
                            i64::try_from(delay_ms).unwrap_or(i64::MAX),
                        )
                        .and_then(|d| now.checked_add_signed(d));
                        warn!(service = %service_name, attempts, retry_in_ms = delay_ms, error = %reason, "Recovery attempt failed");
                        let due = self.due_entry(
                            service_name,
                            entry.status.priority,
                            generation,
                            delay_ms,
                        );
                        (RecoveryState::Scheduled, Some((due, attempts, delay_ms)))
                    }
                }
            }
        };

        // Release the in-flight claim before the retry becomes visible.
        drop(guard);

        match state {
            RecoveryState::Succeeded => {
                if let Some(breaker) = self.breakers.get(service_name) {
                    breaker.reset();
                }
                info!(service = %service_name, attempts = attempt, "Recovery succeeded");
                self.emit(RecoveryEvent::Succeeded {
                    service: service_name.to_string(),
                    attempts: attempt,
                });
            }
            RecoveryState::Failed => {
                self.emit(RecoveryEvent::Failed {
                    service: service_name.to_string(),
                    attempts: attempt,
                });
            }
            _ => {
                if let Some((due, attempts, delay_ms)) = retry {
                    self.queue.lock().push(Reverse(due));
                    self.emit(RecoveryEvent::AttemptFailed {
                        service: service_name.to_string(),
                        attempt: attempts,
                        retry_in_ms: delay_ms,
                    });
                }
            }
        }

        Ok(state)
    }

    /// Cancel an active recovery. Returns `RecoveryNotActive` when there is
    /// nothing to cancel.
    #[instrument(skip(self), fields(service = %service_name))]
    pub fn cancel_recovery(&self, service_name: &str) -> ResilienceResult<RecoveryStatus> {
        let status = {
            let mut entry = self
                .services
                .get_mut(service_name)
                .ok_or_else(|| ResilienceError::RecoveryNotActive(service_name.to_string()))?;
            if !entry.status.state.is_active() {
                return Err(ResilienceError::RecoveryNotActive(service_name.to_string()));
            }
            entry.generation += 1;
            entry.status.state = RecoveryState::Cancelled;
            entry.status.next_attempt_at = None;
            entry.status.updated_at = Utc::now();
            entry.status.clone()
        };

        info!(service = %service_name, "Recovery cancelled");
        self.emit(RecoveryEvent::Cancelled {
            service: service_name.to_string(),
        });
        Ok(status)
    }

    /// Resolve a recovery waiting on an operator.
    pub fn complete_manual_recovery(
        &self,
        service_name: &str,
        succeeded: bool,
    ) -> ResilienceResult<RecoveryState> {
        let state = {
            let mut entry = self
                .services
                .get_mut(service_name)
                .ok_or_else(|| ResilienceError::NotAwaitingManual(service_name.to_string()))?;
            if entry.status.state != RecoveryState::AwaitingManual {
                return Err(ResilienceError::NotAwaitingManual(service_name.to_string()));
            }
            let now = Utc::now();
            entry.status.last_attempt_at = Some(now);
            entry.status.updated_at = now;
            entry.status.state = if succeeded {
                RecoveryState::Succeeded
            } else {
                entry.status.last_error = Some("operator reported failure".into());
                RecoveryState::Failed
            };
            entry.status.state
        };

        if succeeded {
            if let Some(breaker) = self.breakers.get(service_name) {
                breaker.reset();
            }
            self.emit(RecoveryEvent::Succeeded {
                service: service_name.to_string(),
                attempts: 1,
            });
        } else {
            self.emit(RecoveryEvent::Failed {
                service: service_name.to_string(),
                attempts: 1,
            });
        }
        info!(service = %service_name, state = %state, "Manual recovery completed");
        Ok(state)
    }

    pub fn get_recovery_status(&self, service_name: &str) -> Option<RecoveryStatus> {
        self.services
            .get(service_name)
            .map(|entry| entry.status.clone())
    }

    /// All known services, sorted by name.
    pub fn list_recoveries(&self) -> Vec<RecoveryStatus> {
        let mut statuses: Vec<RecoveryStatus> = self
            .services
            .iter()
            .map(|entry| entry.status.clone())
            .collect();
        statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        statuses
    }

    pub fn has_active_recovery(&self, service_name: &str) -> bool {
        self.services
            .get(service_name)
            .map(|entry| entry.status.state.is_active())
            .unwrap_or(false)
    }

    pub fn is_attempt_in_flight(&self, service_name: &str) -> bool {
        self.in_flight.lock().contains(service_name)
    }

    /// Dispatch every due attempt, lower priority value first.
    ///
    /// Returns the dispatched service names in dispatch order.
    pub fn process_due(self: &Arc<Self>) -> Vec<String> {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut queue = self.queue.lock();
            while queue.peek().map_or(false, |Reverse(top)| top.due <= now) {
                if let Some(Reverse(entry)) = queue.pop() {
                    due.push(entry);
                }
            }
        }

        due.retain(|entry| {
            self.services
                .get(&entry.service)
                .map(|s| s.generation == entry.generation && s.status.state == RecoveryState::Scheduled)
                .unwrap_or(false)
        });
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.due.cmp(&b.due))
                .then(a.seq.cmp(&b.seq))
        });

        let mut dispatched = Vec::with_capacity(due.len());
        for entry in due {
            let orchestrator = Arc::clone(self);
            let service = entry.service.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.execute_recovery(&service).await {
                    debug!(service = %service, error = %e, "Scheduled recovery attempt skipped");
                }
            });
            dispatched.push(entry.service);
        }
        dispatched
    }

    fn claim(&self, service_name: &str) -> ResilienceResult<InFlight<'_>> {
        let mut set = self.in_flight.lock();
        if !set.insert(service_name.to_string()) {
            return Err(ResilienceError::RecoveryInProgress(service_name.to_string()));
        }
        Ok(InFlight {
            set: &self.in_flight,
            service: service_name.to_string(),
        })
    }

    fn due_entry(&self, service: &str, priority: u32, generation: u64, delay_ms: u64) -> DueEntry {
        DueEntry {
            due: Instant::now() + Duration::from_millis(delay_ms),
            priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            service: service.to_string(),
            generation,
        }
    }

    fn emit(&self, event: RecoveryEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for RecoveryOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::config::CircuitBreakerConfig;
    use crate::recovery::HealthCheck;

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl HealthCheck for Flaky {
        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.succeed_on
        }
    }

    struct Slow;

    #[async_trait]
    impl HealthCheck for Slow {
        async fn check(&self) -> bool {
            tokio::time::sleep(Duration::from_secs(1)).await;
            true
        }
    }

    fn orchestrator() -> Arc<RecoveryOrchestrator> {
        Arc::new(RecoveryOrchestrator::new(RecoveryConfig::default()))
    }

    fn never_healthy(max: u32) -> RecoveryPolicy {
        RecoveryPolicy::default()
            .with_max_attempts(max)
            .with_health_check(Arc::new(Flaky {
                calls: AtomicU32::new(0),
                succeed_on: u32::MAX,
            }))
    }

    #[tokio::test(start_paused = true)]
    async fn success_closes_breaker() {
        let orchestrator = orchestrator();
        let breaker = Arc::new(CircuitBreaker::new("policy_engine", CircuitBreakerConfig::default()));
        breaker.force_state(CircuitState::Open);
        orchestrator.register_circuit_breaker("policy_engine", breaker.clone());

        let status = orchestrator.schedule_recovery("policy_engine", 1, None).unwrap();
        assert_eq!(status.state, RecoveryState::Scheduled);

        let state = orchestrator.execute_recovery("policy_engine").await.unwrap();
        assert_eq!(state, RecoveryState::Succeeded);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_exhaust() {
        let orchestrator = orchestrator();
        let mut events = orchestrator.subscribe();
        orchestrator
            .schedule_recovery("policy_registry", 1, Some(never_healthy(3)))
            .unwrap();

        assert_eq!(
            orchestrator.execute_recovery("policy_registry").await.unwrap(),
            RecoveryState::Scheduled
        );
        assert_eq!(
            orchestrator.execute_recovery("policy_registry").await.unwrap(),
            RecoveryState::Scheduled
        );
        assert_eq!(
            orchestrator.execute_recovery("policy_registry").await.unwrap(),
            RecoveryState::Failed
        );

        let mut retry_delays = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RecoveryEvent::AttemptFailed { retry_in_ms, .. } = event {
                retry_delays.push(retry_in_ms);
            }
        }
        assert_eq!(retry_delays, vec![1000, 2000]);

        let status = orchestrator.get_recovery_status("policy_registry").unwrap();
        assert_eq!(status.attempt_count, 3);
        assert!(status.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_strategy_waits_for_operator() {
        let orchestrator = orchestrator();
        let policy = RecoveryPolicy::default().with_strategy(RecoveryStrategy::Manual);
        let status = orchestrator
            .schedule_recovery("deliberation", 1, Some(policy))
            .unwrap();
        assert_eq!(status.state, RecoveryState::AwaitingManual);
        assert!(orchestrator.process_due().is_empty());
        assert!(matches!(
            orchestrator.execute_recovery("deliberation").await,
            Err(ResilienceError::RecoveryNotActive(_))
        ));

        assert_eq!(
            orchestrator.complete_manual_recovery("deliberation", true).unwrap(),
            RecoveryState::Succeeded
        );
        assert!(orchestrator.complete_manual_recovery("deliberation", true).is_err());
    }

    #[tokio::test]
    async fn cancel_without_active_recovery_is_reported() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.cancel_recovery("unknown"),
            Err(ResilienceError::RecoveryNotActive(_))
        ));

        orchestrator.schedule_recovery("impact_scorer", 1, None).unwrap();
        let status = orchestrator.cancel_recovery("impact_scorer").unwrap();
        assert_eq!(status.state, RecoveryState::Cancelled);
        assert!(orchestrator.cancel_recovery("impact_scorer").is_err());
        assert!(orchestrator.process_due().is_empty());
    }

    #[tokio::test]
    async fn active_recovery_cannot_be_rescheduled() {
        let orchestrator = orchestrator();
        orchestrator.schedule_recovery("impact_scorer", 1, None).unwrap();
        assert!(matches!(
            orchestrator.schedule_recovery("impact_scorer", 1, None),
            Err(ResilienceError::RecoveryAlreadyActive(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn due_work_is_dispatched_by_priority() {
        let orchestrator = orchestrator();
        orchestrator.schedule_recovery("low", 9, None).unwrap();
        orchestrator.schedule_recovery("high", 1, None).unwrap();
        orchestrator.schedule_recovery("mid", 5, None).unwrap();

        assert_eq!(orchestrator.process_due(), vec!["high", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_attempt_in_flight_per_service() {
        let orchestrator = orchestrator();
        let policy = RecoveryPolicy::default().with_health_check(Arc::new(Slow));
        orchestrator
            .schedule_recovery("policy_engine", 1, Some(policy))
            .unwrap();

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute_recovery("policy_engine").await }
        });
        tokio::task::yield_now().await;
        assert!(orchestrator.is_attempt_in_flight("policy_engine"));

        assert!(matches!(
            orchestrator.execute_recovery("policy_engine").await,
            Err(ResilienceError::RecoveryInProgress(_))
        ));

        assert_eq!(first.await.unwrap().unwrap(), RecoveryState::Succeeded);
        assert!(!orchestrator.is_attempt_in_flight("policy_engine"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_attempt_wins() {
        let orchestrator = orchestrator();
        let policy = RecoveryPolicy::default().with_health_check(Arc::new(Slow));
        orchestrator
            .schedule_recovery("policy_engine", 1, Some(policy))
            .unwrap();

        let attempt = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute_recovery("policy_engine").await }
        });
        tokio::task::yield_now().await;
        orchestrator.cancel_recovery("policy_engine").unwrap();

        assert_eq!(attempt.await.unwrap().unwrap(), RecoveryState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_retries_until_healthy() {
        let orchestrator = orchestrator();
        let policy = RecoveryPolicy::default().with_health_check(Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        }));
        orchestrator
            .schedule_recovery("policy_registry", 1, Some(policy))
            .unwrap();
        orchestrator.start().unwrap();

        // Attempts at t=0, t=1s, t=3s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = orchestrator.get_recovery_status("policy_registry").unwrap();
        assert_eq!(status.state, RecoveryState::Succeeded);
        assert_eq!(status.attempt_count, 2);

        orchestrator.stop();
    }
}
