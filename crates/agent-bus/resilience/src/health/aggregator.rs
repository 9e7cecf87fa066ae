//! Background health aggregation over circuit breakers.
//!
//! The poll loop snapshots every registered breaker, scores the system and
//! appends to a bounded history. Status changes are handed to a bounded
//! channel with `try_send`; a separate drain task hands each report to every
//! listener on a detached task, capped per listener by a semaphore. Nothing
//! on the poll path awaits a listener.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::report::{HealthSnapshot, SystemHealthReport};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::HealthConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Receives health status changes.
///
/// Invoked on a detached task; errors and panics are counted and logged,
/// never surfaced to the aggregator or to message processing.
#[async_trait]
pub trait HealthChangeListener: Send + Sync {
    async fn on_health_change(&self, report: &SystemHealthReport) -> ResilienceResult<()>;
}

/// Notification dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub listener_failures: u64,
    /// Reports not delivered because the listener was saturated.
    pub listener_overflows: u64,
}

#[derive(Default)]
struct DispatchCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
    listener_failures: AtomicU64,
    listener_overflows: AtomicU64,
}

#[derive(Clone)]
struct ListenerSlot {
    listener: Arc<dyn HealthChangeListener>,
    in_flight: Arc<Semaphore>,
}

type Listeners = Arc<RwLock<Vec<ListenerSlot>>>;

struct AggregatorTasks {
    poll: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// Scores system health from a dynamic set of circuit breakers.
pub struct HealthAggregator {
    config: HealthConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listeners: Listeners,
    current: RwLock<SystemHealthReport>,
    history: Mutex<VecDeque<HealthSnapshot>>,
    capacity: usize,
    dispatch_tx: RwLock<Option<mpsc::Sender<SystemHealthReport>>>,
    counters: Arc<DispatchCounters>,
    tasks: Mutex<Option<AggregatorTasks>>,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig) -> Self {
        let capacity = config.history_capacity();
        Self {
            config,
            breakers: DashMap::new(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            current: RwLock::new(SystemHealthReport::unknown()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity,
            dispatch_tx: RwLock::new(None),
            counters: Arc::new(DispatchCounters::default()),
            tasks: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Add a breaker to the monitored set. Replaces any breaker of the same name.
    pub fn register_circuit_breaker(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        let name = name.into();
        debug!(breaker = %name, "Registering circuit breaker for health aggregation");
        self.breakers.insert(name, breaker);
    }

    pub fn unregister_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    pub fn circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub fn on_health_change(&self, listener: Arc<dyn HealthChangeListener>) {
        let in_flight = Arc::new(Semaphore::new(self.config.listener_max_in_flight));
        self.listeners.write().push(ListenerSlot { listener, in_flight });
    }

    /// Start the poll loop and the notification drain.
    pub fn start(self: &Arc<Self>) -> ResilienceResult<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(ResilienceError::AlreadyRunning("health aggregator"));
        }

        let (tx, rx) = mpsc::channel(self.config.callback_channel_capacity);
        *self.dispatch_tx.write() = Some(tx);

        let drain = tokio::spawn(drain_notifications(
            rx,
            self.listeners.clone(),
            self.counters.clone(),
        ));

        let weak = Arc::downgrade(self);
        let period = self.config.check_interval();
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(aggregator) = weak.upgrade() else {
                    break;
                };
                aggregator.poll_once();
            }
        });

        info!(
            interval_ms = self.config.check_interval_ms,
            history_capacity = self.capacity,
            "Health aggregator started"
        );
        *tasks = Some(AggregatorTasks { poll, drain });
        Ok(())
    }

    /// Stop background work. Idempotent.
    pub fn stop(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            tasks.poll.abort();
            tasks.drain.abort();
            *self.dispatch_tx.write() = None;
            info!("Health aggregator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Run one aggregation pass.
    pub fn poll_once(&self) -> SystemHealthReport {
        let states: BTreeMap<String, CircuitState> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();

        let report = SystemHealthReport::from_states(states, &self.config);

        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, report.clone()).status
        };

        {
            let mut history = self.history.lock();
            while history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(report.snapshot());
        }

        if previous != report.status {
            info!(
                old_status = %previous,
                new_status = %report.status,
                health_score = ?report.health_score,
                "System health status changed"
            );
            self.notify(report.clone());
        }

        report
    }

    /// Latest report. Never mutates state.
    pub fn get_system_health(&self) -> SystemHealthReport {
        self.current.read().clone()
    }

    /// Snapshots recorded within the last `window_minutes`, oldest first.
    pub fn get_health_history(&self, window_minutes: u64) -> Vec<HealthSnapshot> {
        let cutoff = i64::try_from(window_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .and_then(|window| Utc::now().checked_sub_signed(window));

        self.history
            .lock()
            .iter()
            .filter(|snapshot| cutoff.map_or(true, |c| snapshot.timestamp >= c))
            .cloned()
            .collect()
    }

    pub fn history_capacity(&self) -> usize {
        self.capacity
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        DispatchStats {
            notifications_sent: self.counters.sent.load(Ordering::Relaxed),
            notifications_dropped: self.counters.dropped.load(Ordering::Relaxed),
            listener_failures: self.counters.listener_failures.load(Ordering::Relaxed),
            listener_overflows: self.counters.listener_overflows.load(Ordering::Relaxed),
        }
    }

    fn notify(&self, report: SystemHealthReport) {
        let tx = self.dispatch_tx.read();
        let Some(tx) = tx.as_ref() else {
            debug!("Health aggregator not started; change notification skipped");
            return;
        };

        match tx.try_send(report) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Health notification channel full; notification dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Health notification channel closed");
            }
        }
    }
}

impl Drop for HealthAggregator {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.poll.abort();
            tasks.drain.abort();
        }
    }
}

async fn drain_notifications(
    mut rx: mpsc::Receiver<SystemHealthReport>,
    listeners: Listeners,
    counters: Arc<DispatchCounters>,
) {
    while let Some(report) = rx.recv().await {
        let report = Arc::new(report);
        let current: Vec<ListenerSlot> = listeners.read().clone();

        for slot in current {
            let Ok(permit) = slot.in_flight.try_acquire_owned() else {
                counters.listener_overflows.fetch_add(1, Ordering::Relaxed);
                warn!("Health change listener saturated; notification dropped");
                continue;
            };
            let listener = slot.listener;
            let report = report.clone();
            let counters = counters.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(listener.on_health_change(&report))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        counters.listener_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Health change listener failed");
                    }
                    Err(_) => {
                        counters.listener_failures.fetch_add(1, Ordering::Relaxed);
                        error!("Health change listener panicked");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::health::SystemHealthStatus;

    fn breaker(name: &str) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(name, CircuitBreakerConfig::default()))
    }

    fn aggregator_with(states: &[(&str, CircuitState)]) -> Arc<HealthAggregator> {
        let aggregator = Arc::new(HealthAggregator::new(HealthConfig::default()));
        for (name, state) in states {
            let b = breaker(name);
            b.force_state(*state);
            aggregator.register_circuit_breaker(*name, b);
        }
        aggregator
    }

    struct Recorder(UnboundedSender<SystemHealthStatus>);

    #[async_trait]
    impl HealthChangeListener for Recorder {
        async fn on_health_change(&self, report: &SystemHealthReport) -> ResilienceResult<()> {
            let _ = self.0.send(report.status);
            Ok(())
        }
    }

    struct Sleeper(Duration);

    #[async_trait]
    impl HealthChangeListener for Sleeper {
        async fn on_health_change(&self, _report: &SystemHealthReport) -> ResilienceResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl HealthChangeListener for Failing {
        async fn on_health_change(&self, _report: &SystemHealthReport) -> ResilienceResult<()> {
            Err(ResilienceError::Listener("pager unreachable".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl HealthChangeListener for Panicking {
        async fn on_health_change(&self, _report: &SystemHealthReport) -> ResilienceResult<()> {
            panic!("listener bug");
        }
    }

    struct Stuck;

    #[async_trait]
    impl HealthChangeListener for Stuck {
        async fn on_health_change(&self, _report: &SystemHealthReport) -> ResilienceResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn wait_for_failures(aggregator: &HealthAggregator, expected: u64) {
        for _ in 0..100 {
            if aggregator.dispatch_stats().listener_failures >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener failures never reached {expected}");
    }

    #[test]
    fn initial_status_is_unknown() {
        let aggregator = HealthAggregator::new(HealthConfig::default());
        assert_eq!(
            aggregator.get_system_health().status,
            SystemHealthStatus::Unknown
        );
        assert!(aggregator.get_health_history(5).is_empty());
    }

    #[test]
    fn poll_scores_registered_breakers() {
        let aggregator = aggregator_with(&[
            ("a", CircuitState::Closed),
            ("b", CircuitState::Closed),
            ("c", CircuitState::HalfOpen),
            ("d", CircuitState::Open),
        ]);

        let report = aggregator.poll_once();
        assert_eq!(report.health_score, Some(0.625));
        assert_eq!(report.status, SystemHealthStatus::Degraded);
        assert_eq!(report.circuit_breakers.len(), 4);
        assert_eq!(aggregator.get_system_health(), report);
    }

    #[test]
    fn breakers_can_join_after_first_poll() {
        let aggregator = aggregator_with(&[("a", CircuitState::Closed)]);
        assert_eq!(aggregator.poll_once().total_breakers, 1);

        aggregator.register_circuit_breaker("late", breaker("late"));
        assert_eq!(aggregator.poll_once().total_breakers, 2);
    }

    #[test]
    fn history_evicts_oldest() {
        let config = HealthConfig {
            check_interval_ms: 30_000,
            history_window_minutes: 1,
            ..Default::default()
        };
        let aggregator = HealthAggregator::new(config);
        assert_eq!(aggregator.history_capacity(), 2);

        let first = aggregator.poll_once().timestamp;
        aggregator.poll_once();
        aggregator.poll_once();

        let history = aggregator.get_health_history(10);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|s| s.timestamp >= first));
    }

    #[tokio::test]
    async fn status_change_reaches_listener() {
        let aggregator = aggregator_with(&[("a", CircuitState::Closed)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        aggregator.on_health_change(Arc::new(Recorder(tx)));
        aggregator.start().unwrap();

        aggregator.poll_once();
        let status = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, SystemHealthStatus::Healthy);

        // Unchanged status does not notify again.
        aggregator.poll_once();
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());

        aggregator.stop();
    }

    #[tokio::test]
    async fn slow_listener_never_delays_poll() {
        let aggregator = aggregator_with(&[("a", CircuitState::Closed)]);
        aggregator.on_health_change(Arc::new(Sleeper(Duration::from_secs(2))));
        aggregator.start().unwrap();

        let breaker = aggregator.circuit_breaker("a").unwrap();
        for i in 0..20 {
            breaker.force_state(if i % 2 == 0 {
                CircuitState::Open
            } else {
                CircuitState::Closed
            });
            let started = std::time::Instant::now();
            aggregator.poll_once();
            assert!(started.elapsed() < Duration::from_millis(100));
        }

        aggregator.stop();
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_are_counted() {
        let aggregator = aggregator_with(&[("a", CircuitState::Open)]);
        aggregator.on_health_change(Arc::new(Failing));
        aggregator.on_health_change(Arc::new(Panicking));
        aggregator.start().unwrap();

        aggregator.poll_once();
        wait_for_failures(&aggregator, 2).await;
        assert_eq!(aggregator.dispatch_stats().notifications_sent, 1);

        aggregator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_fills_history() {
        let config = HealthConfig {
            check_interval_ms: 1_000,
            ..Default::default()
        };
        let aggregator = Arc::new(HealthAggregator::new(config));
        aggregator.register_circuit_breaker("a", breaker("a"));
        aggregator.start().unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(aggregator.get_health_history(5).len() >= 3);
        assert_eq!(
            aggregator.get_system_health().status,
            SystemHealthStatus::Healthy
        );

        aggregator.stop();
        assert!(!aggregator.is_running());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let aggregator = Arc::new(HealthAggregator::new(HealthConfig::default()));
        aggregator.start().unwrap();
        assert!(matches!(
            aggregator.start(),
            Err(ResilienceError::AlreadyRunning(_))
        ));
        aggregator.stop();
        aggregator.stop();
    }

    #[tokio::test]
    async fn stuck_listener_is_capped() {
        let config = HealthConfig {
            listener_max_in_flight: 2,
            ..Default::default()
        };
        let aggregator = Arc::new(HealthAggregator::new(config));
        let breaker = breaker("a");
        aggregator.register_circuit_breaker("a", breaker.clone());
        aggregator.on_health_change(Arc::new(Stuck));
        aggregator.start().unwrap();

        for i in 0..5 {
            breaker.force_state(if i % 2 == 0 {
                CircuitState::Open
            } else {
                CircuitState::Closed
            });
            aggregator.poll_once();
        }

        for _ in 0..100 {
            if aggregator.dispatch_stats().listener_overflows >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = aggregator.dispatch_stats();
        assert_eq!(stats.notifications_sent, 5);
        assert_eq!(stats.listener_overflows, 3);

        aggregator.stop();
    }
}
