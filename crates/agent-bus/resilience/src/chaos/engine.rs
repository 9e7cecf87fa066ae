//! Controlled fault injection.
//!
//! Scenarios are reference-counted per component so overlapping scenarios
//! on the same target release their effects only when the last one ends.
//! Expiry, explicit deactivation and emergency stop share one cleanup path,
//! all under a single state lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::scenario::{ChaosScenario, Fault};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::ChaosConfig;
use crate::error::{ResilienceError, ResilienceResult};

struct ActiveScenario {
    scenario: ChaosScenario,
    expiry: Option<JoinHandle<()>>,
}

struct BreakerHold {
    count: usize,
    restore: CircuitState,
}

#[derive(Default)]
struct ChaosState {
    scenarios: HashMap<Uuid, ActiveScenario>,
    target_refs: HashMap<String, usize>,
    breaker_holds: HashMap<String, BreakerHold>,
}

/// Injects bounded, time-limited faults into named components.
pub struct ChaosEngine {
    config: ChaosConfig,
    state: Mutex<ChaosState>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    emergency_stopped: AtomicBool,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ChaosState::default()),
            breakers: DashMap::new(),
            emergency_stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Make a breaker available to `force_circuit_open`.
    pub fn register_circuit_breaker(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(name.into(), breaker);
    }

    #[instrument(skip(self, blast_radius))]
    pub async fn inject_latency(
        self: &Arc<Self>,
        target: &str,
        delay_ms: u64,
        duration_s: f64,
        blast_radius: Option<BTreeSet<String>>,
    ) -> ResilienceResult<ChaosScenario> {
        self.inject_fault(
            format!("latency-{target}"),
            target,
            Fault::Latency { delay_ms },
            duration_s,
            blast_radius,
        )
    }

    #[instrument(skip(self, blast_radius))]
    pub async fn inject_errors(
        self: &Arc<Self>,
        target: &str,
        error_rate: f64,
        error_type: &str,
        duration_s: f64,
        blast_radius: Option<BTreeSet<String>>,
    ) -> ResilienceResult<ChaosScenario> {
        self.inject_fault(
            format!("errors-{target}"),
            target,
            Fault::Error {
                error_rate,
                error_type: error_type.to_string(),
            },
            duration_s,
            blast_radius,
        )
    }

    #[instrument(skip(self))]
    pub async fn force_circuit_open(
        self: &Arc<Self>,
        breaker_name: &str,
        duration_s: f64,
    ) -> ResilienceResult<ChaosScenario> {
        self.inject_fault(
            format!("circuit-open-{breaker_name}"),
            breaker_name,
            Fault::CircuitBreaker,
            duration_s,
            None,
        )
    }

    #[instrument(skip(self, blast_radius))]
    pub async fn simulate_resource_exhaustion(
        self: &Arc<Self>,
        target: &str,
        resource: &str,
        level: f64,
        duration_s: f64,
        blast_radius: Option<BTreeSet<String>>,
    ) -> ResilienceResult<ChaosScenario> {
        self.inject_fault(
            format!("exhaustion-{resource}-{target}"),
            target,
            Fault::ResourceExhaustion {
                resource: resource.to_string(),
                level,
            },
            duration_s,
            blast_radius,
        )
    }

    /// Activate any fault against `target`. Must be called from within a
    /// tokio runtime; the expiry timer runs as a task.
    pub fn inject_fault(
        self: &Arc<Self>,
        name: String,
        target: &str,
        fault: Fault,
        duration_s: f64,
        blast_radius: Option<BTreeSet<String>>,
    ) -> ResilienceResult<ChaosScenario> {
        if !self.config.enabled {
            return Err(ResilienceError::ChaosDisabled);
        }
        if self.is_emergency_stopped() {
            return Err(ResilienceError::EmergencyStopActive);
        }

        let scenario = ChaosScenario::new(
            name,
            target,
            fault,
            duration_s,
            self.config.max_duration_s,
            blast_radius,
        )?;

        let breaker = if scenario.fault == Fault::CircuitBreaker {
            Some(
                self.breakers
                    .get(target)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| ResilienceError::BreakerNotFound(target.to_string()))?,
            )
        } else {
            None
        };

        let mut state = self.state.lock();
        // Re-checked under the lock so a concurrent emergency stop cannot
        // miss this scenario.
        if self.is_emergency_stopped() {
            return Err(ResilienceError::EmergencyStopActive);
        }

        for component in &scenario.blast_radius {
            *state.target_refs.entry(component.clone()).or_insert(0) += 1;
        }

        if let Some(breaker) = breaker {
            match state.breaker_holds.get_mut(target) {
                Some(hold) => hold.count += 1,
                None => {
                    let restore = breaker.state();
                    breaker.hold_open();
                    state
                        .breaker_holds
                        .insert(target.to_string(), BreakerHold { count: 1, restore });
                }
            }
        }

        let id = scenario.scenario_id;
        let weak = Arc::downgrade(self);
        let lifetime = scenario.duration();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Some(engine) = weak.upgrade() {
                engine.expire(id);
            }
        });

        state.scenarios.insert(
            id,
            ActiveScenario {
                scenario: scenario.clone(),
                expiry: Some(expiry),
            },
        );
        drop(state);

        info!(
            scenario_id = %id,
            chaos_type = %scenario.chaos_type(),
            target = %scenario.target,
            duration_s = scenario.duration_s,
            "Chaos scenario activated"
        );
        Ok(scenario)
    }

    /// Deactivate a scenario. Returns whether it was active; deactivating an
    /// inactive scenario is a no-op.
    pub fn deactivate_scenario(&self, scenario_id: Uuid) -> bool {
        let removed = {
            let mut state = self.state.lock();
            self.remove_locked(&mut state, scenario_id)
        };
        match removed {
            Some(mut active) => {
                if let Some(expiry) = active.expiry.take() {
                    expiry.abort();
                }
                info!(scenario_id = %scenario_id, "Chaos scenario deactivated");
                true
            }
            None => {
                debug!(scenario_id = %scenario_id, "Chaos scenario already inactive");
                false
            }
        }
    }

    /// Deactivate every scenario and refuse new injections until
    /// [`reset_emergency_stop`](Self::reset_emergency_stop).
    pub fn emergency_stop(&self) -> usize {
        self.emergency_stopped.store(true, Ordering::SeqCst);

        let mut removed: Vec<ActiveScenario> = {
            let mut state = self.state.lock();
            let ids: Vec<Uuid> = state.scenarios.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| self.remove_locked(&mut state, id))
                .collect()
        };

        for active in removed.iter_mut() {
            if let Some(expiry) = active.expiry.take() {
                expiry.abort();
            }
        }

        warn!(stopped = removed.len(), "Chaos emergency stop executed");
        removed.len()
    }

    pub fn reset_emergency_stop(&self) {
        if self.emergency_stopped.swap(false, Ordering::SeqCst) {
            info!("Chaos emergency stop reset; injection re-armed");
        }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::SeqCst)
    }

    /// Active scenarios, oldest first.
    pub fn active_scenarios(&self) -> Vec<ChaosScenario> {
        let mut scenarios: Vec<ChaosScenario> = self
            .state
            .lock()
            .scenarios
            .values()
            .map(|active| active.scenario.clone())
            .collect();
        scenarios.sort_by_key(|s| s.started_at);
        scenarios
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().scenarios.len()
    }

    /// Number of active scenarios whose blast radius includes `component`.
    pub fn target_ref_count(&self, component: &str) -> usize {
        self.state
            .lock()
            .target_refs
            .get(component)
            .copied()
            .unwrap_or(0)
    }

    /// Apply active faults for `component`: sleep for injected latency and
    /// fail with an injected error where a scenario says so.
    pub async fn perturb(&self, component: &str) -> ResilienceResult<()> {
        let faults: Vec<Fault> = {
            let state = self.state.lock();
            if state.target_refs.get(component).copied().unwrap_or(0) == 0 {
                return Ok(());
            }
            state
                .scenarios
                .values()
                .filter(|active| active.scenario.affects(component))
                .map(|active| active.scenario.fault.clone())
                .collect()
        };

        let mut delay = Duration::ZERO;
        let mut failure: Option<String> = None;
        {
            let mut rng = rand::thread_rng();
            for fault in &faults {
                match fault {
                    Fault::Latency { delay_ms } => delay += Duration::from_millis(*delay_ms),
                    Fault::Error {
                        error_rate,
                        error_type,
                    } => {
                        if failure.is_none() && rng.gen::<f64>() < *error_rate {
                            failure = Some(error_type.clone());
                        }
                    }
                    Fault::ResourceExhaustion { resource, level } => {
                        if failure.is_none() && rng.gen::<f64>() < *level {
                            failure = Some(format!("{resource} exhaustion"));
                        }
                    }
                    Fault::NetworkPartition => {
                        failure.get_or_insert_with(|| "network partition".to_string());
                    }
                    Fault::Timeout { timeout_ms } => {
                        delay += Duration::from_millis(*timeout_ms);
                        failure.get_or_insert_with(|| "timeout".to_string());
                    }
                    Fault::CircuitBreaker => {}
                }
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(fault) => Err(ResilienceError::InjectedFault {
                target: component.to_string(),
                fault,
            }),
            None => Ok(()),
        }
    }

    fn expire(&self, scenario_id: Uuid) {
        let removed = {
            let mut state = self.state.lock();
            self.remove_locked(&mut state, scenario_id)
        };
        if removed.is_some() {
            info!(scenario_id = %scenario_id, "Chaos scenario expired");
        }
    }

    /// Shared cleanup. Caller holds the state lock.
    fn remove_locked(&self, state: &mut ChaosState, scenario_id: Uuid) -> Option<ActiveScenario> {
        let active = state.scenarios.remove(&scenario_id)?;
        let scenario = &active.scenario;

        for component in &scenario.blast_radius {
            if let Some(count) = state.target_refs.get_mut(component) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.target_refs.remove(component);
                }
            }
        }

        if scenario.fault == Fault::CircuitBreaker {
            let release = match state.breaker_holds.get_mut(&scenario.target) {
                Some(hold) => {
                    hold.count = hold.count.saturating_sub(1);
                    hold.count == 0
                }
                None => false,
            };
            if release {
                if let Some(hold) = state.breaker_holds.remove(&scenario.target) {
                    if let Some(breaker) = self.breakers.get(&scenario.target) {
                        breaker.release_hold(hold.restore);
                    }
                }
            }
        }

        Some(active)
    }
}

impl Drop for ChaosEngine {
    fn drop(&mut self) {
        for active in self.state.get_mut().scenarios.values_mut() {
            if let Some(expiry) = active.expiry.take() {
                expiry.abort();
            }
        }
    }
}
