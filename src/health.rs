//! Health monitoring for object pools

use crate::metrics::PoolMetrics;

/// Health assessment derived from a metrics snapshot.
///
/// # Examples
///
/// ```
/// use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::new(FnAllocator::new(|| 0u8), PoolConfiguration::new(3)).unwrap();
///
/// let health = pool.health_status();
/// assert!(health.is_healthy());
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is operating without pressure.
    pub is_healthy: bool,

    /// Current pool utilization (0.0 to 1.0).
    pub utilization: f64,

    /// Warning messages describing detected pressure.
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Assess pool health from a metrics snapshot.
    pub fn from_metrics(metrics: &PoolMetrics) -> Self {
        let utilization = metrics.utilization();
        let mut warnings = Vec::new();

        if utilization > 0.9 {
            warnings.push(format!("high utilization: {:.1}%", utilization * 100.0));
        }
        if metrics.currently_waiting_count > 0 {
            warnings.push(format!(
                "{} claims waiting for a free slot",
                metrics.currently_waiting_count
            ));
        }

        Self {
            is_healthy: warnings.is_empty(),
            utilization,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
