//! Prometheus metrics for the bus.

use agent_bus_resilience::{CircuitState, RecoveryEvent, SystemHealthReport};
use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::router::RoutingPath;

/// Content type of [`BusMetrics::export`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Bus metrics, registered on a registry owned by this struct.
pub struct BusMetrics {
    registry: Registry,

    /// Messages by final result
    pub messages_total: IntCounterVec,

    /// Validation strategy latency
    pub validation_duration_seconds: Histogram,

    /// Routing decisions by path
    pub routing_total: IntCounterVec,

    /// Last computed system health score
    pub health_score: Gauge,

    /// Breaker state (0=closed, 1=half-open, 2=open)
    pub circuit_breaker_state: GaugeVec,

    /// Recovery events by service and outcome
    pub recovery_attempts_total: IntCounterVec,

    /// Active chaos scenarios
    pub chaos_active_scenarios: IntGauge,

    /// Dropped or failed fire-and-forget work
    pub side_effect_failures_total: IntCounterVec,

    /// PII spans redacted from payloads
    pub pii_redactions_total: IntCounter,
}

impl BusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("agent_bus_messages_total", "Messages processed by result"),
                &["result"],
            )?,
        )?;

        let validation_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "agent_bus_validation_duration_seconds",
                    "Constitutional validation duration",
                )
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            )?,
        )?;

        let routing_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("agent_bus_routing_total", "Routing decisions by path"),
                &["path"],
            )?,
        )?;

        let health_score = register(
            &registry,
            Gauge::new("agent_bus_health_score", "System health score in [0, 1]")?,
        )?;

        let circuit_breaker_state = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "agent_bus_circuit_breaker_state",
                    "Circuit breaker state (0=closed, 1=half-open, 2=open)",
                ),
                &["name"],
            )?,
        )?;

        let recovery_attempts_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("agent_bus_recovery_attempts_total", "Recovery events by outcome"),
                &["service", "outcome"],
            )?,
        )?;

        let chaos_active_scenarios = register(
            &registry,
            IntGauge::new("agent_bus_chaos_active_scenarios", "Active chaos scenarios")?,
        )?;

        let side_effect_failures_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "agent_bus_side_effect_failures_total",
                    "Dropped or failed audit, callback and metrics work",
                ),
                &["kind"],
            )?,
        )?;

        let pii_redactions_total = register(
            &registry,
            IntCounter::new("agent_bus_pii_redactions_total", "PII spans redacted")?,
        )?;

        Ok(Self {
            registry,
            messages_total,
            validation_duration_seconds,
            routing_total,
            health_score,
            circuit_breaker_state,
            recovery_attempts_total,
            chaos_active_scenarios,
            side_effect_failures_total,
            pii_redactions_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_message(&self, result: &str) {
        self.messages_total.with_label_values(&[result]).inc();
    }

    pub fn observe_validation(&self, seconds: f64) {
        self.validation_duration_seconds.observe(seconds);
    }

    pub fn record_route(&self, path: RoutingPath) {
        self.routing_total.with_label_values(&[path.as_str()]).inc();
    }

    pub fn side_effect_failure(&self, kind: &str) {
        self.side_effect_failures_total.with_label_values(&[kind]).inc();
    }

    pub fn record_redactions(&self, count: usize) {
        self.pii_redactions_total.inc_by(count as u64);
    }

    pub fn record_recovery(&self, event: &RecoveryEvent) {
        self.recovery_attempts_total
            .with_label_values(&[event.service(), event.outcome()])
            .inc();
    }

    /// Refresh gauges from a health report.
    pub fn set_health(&self, report: &SystemHealthReport) {
        self.health_score.set(report.health_score.unwrap_or(0.0));
        for (name, state) in &report.circuit_breakers {
            self.set_breaker_state(name, *state);
        }
    }

    pub fn set_breaker_state(&self, name: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[name])
            .set(state.as_gauge());
    }

    pub fn set_chaos_active(&self, count: usize) {
        self.chaos_active_scenarios.set(count as i64);
    }

    /// Text exposition of every registered metric.
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn register<M>(registry: &Registry, metric: M) -> prometheus::Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use agent_bus_resilience::HealthConfig;

    use super::*;

    #[test]
    fn export_contains_every_family() {
        let metrics = BusMetrics::new().unwrap();
        metrics.record_message("delivered");
        metrics.observe_validation(0.002);
        metrics.record_route(RoutingPath::Fast);
        metrics.side_effect_failure("audit_dropped");
        metrics.record_redactions(2);
        metrics.set_chaos_active(1);
        metrics.record_recovery(&RecoveryEvent::Succeeded {
            service: "policy_engine".into(),
            attempts: 1,
        });
        metrics.set_health(&SystemHealthReport::from_states(
            BTreeMap::from([("policy_engine".to_string(), CircuitState::HalfOpen)]),
            &HealthConfig::default(),
        ));

        let text = metrics.export().unwrap();
        for family in [
            "agent_bus_messages_total",
            "agent_bus_validation_duration_seconds",
            "agent_bus_routing_total",
            "agent_bus_health_score",
            "agent_bus_circuit_breaker_state",
            "agent_bus_recovery_attempts_total",
            "agent_bus_chaos_active_scenarios",
            "agent_bus_side_effect_failures_total",
            "agent_bus_pii_redactions_total",
        ] {
            assert!(text.contains(family), "missing {family}");
        }
        assert!(text.contains(r#"agent_bus_circuit_breaker_state{name="policy_engine"} 1"#));
        assert!(text.contains("agent_bus_health_score 0.5"));
    }

    #[test]
    fn registries_are_independent() {
        BusMetrics::new().unwrap();
        BusMetrics::new().unwrap();
    }
}
