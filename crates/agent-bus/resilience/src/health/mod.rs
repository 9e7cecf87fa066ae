//! Health aggregation.

mod aggregator;
mod report;

pub use aggregator::{DispatchStats, HealthAggregator, HealthChangeListener};
pub use report::{
    classify_health, compute_health_score, HealthSnapshot, SystemHealthReport, SystemHealthStatus,
};
