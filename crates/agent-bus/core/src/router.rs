//! Impact-based path selection.

use std::sync::Arc;

use agent_bus_resilience::CircuitBreaker;
use agent_bus_types::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::ImpactScorer;
use crate::dependencies::guarded;

/// Where a validated message goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPath {
    /// Straight to delivery.
    Fast,
    /// Held for a deliberation decision.
    Deliberation,
}

impl RoutingPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingPath::Fast => "fast",
            RoutingPath::Deliberation => "deliberation",
        }
    }
}

impl std::fmt::Display for RoutingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores at or above `threshold` deliberate. So does anything that is not
/// a number.
pub fn select_path(score: f64, threshold: f64) -> RoutingPath {
    if score.is_nan() || score >= threshold {
        RoutingPath::Deliberation
    } else {
        RoutingPath::Fast
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub path: RoutingPath,
    pub impact_score: Option<f64>,

    /// Set when the scorer could not be used; the message was routed to
    /// deliberation without a score.
    pub degraded: Option<String>,

    /// Scorer was unreachable rather than merely wrong.
    pub scorer_unavailable: bool,
}

/// Routes messages on the score produced by an [`ImpactScorer`].
pub struct ImpactRouter {
    scorer: Arc<dyn ImpactScorer>,
    breaker: Arc<CircuitBreaker>,
    threshold: f64,
}

impl ImpactRouter {
    pub fn new(scorer: Arc<dyn ImpactScorer>, breaker: Arc<CircuitBreaker>, threshold: f64) -> Self {
        Self {
            scorer,
            breaker,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score the message, record the score on it, and pick a path.
    ///
    /// A scorer failure or an out-of-range score routes to deliberation.
    pub async fn route(&self, message: &mut Message) -> RoutingDecision {
        let scored = guarded(&self.breaker, self.scorer.score(message)).await;

        let (score, scorer_unavailable) = match scored {
            Ok(score) => (score, false),
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Impact scoring failed; deliberating");
                return RoutingDecision {
                    path: RoutingPath::Deliberation,
                    impact_score: None,
                    degraded: Some(e.to_string()),
                    scorer_unavailable: e.is_unavailability(),
                };
            }
        };

        if let Err(e) = message.assign_impact_score(score) {
            warn!(message_id = %message.message_id, score, error = %e, "Unusable impact score; deliberating");
            return RoutingDecision {
                path: RoutingPath::Deliberation,
                impact_score: message.impact_score(),
                degraded: Some(e.to_string()),
                scorer_unavailable,
            };
        }

        let path = select_path(score, self.threshold);
        debug!(message_id = %message.message_id, score, path = %path, "Message routed");
        RoutingDecision {
            path,
            impact_score: Some(score),
            degraded: None,
            scorer_unavailable,
        }
    }
}
