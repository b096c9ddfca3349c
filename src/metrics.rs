//! Metrics collection and export for object pools

use std::collections::HashMap;

/// Snapshot of pool counters, taken under the pool's lock so all fields are
/// consistent with each other at a single instant.
///
/// # Examples
///
/// ```
/// use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::new(FnAllocator::new(|| 42u32), PoolConfiguration::new(3)).unwrap();
///
/// {
///     let _obj = pool.claim().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.currently_claimed, 1);
///     assert_eq!(metrics.total_claimed, 1);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Handles currently handed out to claimers.
    pub currently_claimed: usize,

    /// Claim calls currently blocked waiting for a free handle or slot.
    pub currently_waiting_count: usize,

    /// Configured warm-core size.
    pub core_poolsize: usize,

    /// Configured upper bound on allocated instances.
    pub max_poolsize: usize,

    /// Live instances: idle plus claimed.
    pub currently_allocated: usize,

    /// Instances ever allocated over the pool's lifetime.
    pub total_allocated: u64,

    /// Successful claims over the pool's lifetime.
    pub total_claimed: u64,
}

impl PoolMetrics {
    /// Pool utilization ratio (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_poolsize > 0 {
            self.currently_claimed as f64 / self.max_poolsize as f64
        } else {
            0.0
        }
    }

    /// Export metrics as a string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("currently_claimed".to_owned(), self.currently_claimed.to_string());
        metrics.insert(
            "currently_waiting_count".to_owned(),
            self.currently_waiting_count.to_string(),
        );
        metrics.insert("core_poolsize".to_owned(), self.core_poolsize.to_string());
        metrics.insert("max_poolsize".to_owned(), self.max_poolsize.to_string());
        metrics.insert(
            "currently_allocated".to_owned(),
            self.currently_allocated.to_string(),
        );
        metrics.insert("total_allocated".to_owned(), self.total_allocated.to_string());
        metrics.insert("total_claimed".to_owned(), self.total_claimed.to_string());
        metrics.insert("utilization".to_owned(), format!("{:.2}", self.utilization()));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use genpool::{FnAllocator, ObjectPool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool = ObjectPool::new(FnAllocator::new(|| 1u8), PoolConfiguration::new(3)).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = genpool::MetricsExporter::export_prometheus(
    ///     &pool.get_metrics(),
    ///     "my_pool",
    ///     Some(&tags),
    /// );
    /// assert!(output.contains("objectpool_objects_claimed"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        output.push_str("# HELP objectpool_objects_claimed Handles currently claimed\n");
        output.push_str("# TYPE objectpool_objects_claimed gauge\n");
        output.push_str(&format!(
            "objectpool_objects_claimed{{{}}} {}\n",
            labels, metrics.currently_claimed
        ));

        output.push_str("# HELP objectpool_claims_waiting Claim calls currently blocked\n");
        output.push_str("# TYPE objectpool_claims_waiting gauge\n");
        output.push_str(&format!(
            "objectpool_claims_waiting{{{}}} {}\n",
            labels, metrics.currently_waiting_count
        ));

        output.push_str("# HELP objectpool_objects_allocated Live instances, idle plus claimed\n");
        output.push_str("# TYPE objectpool_objects_allocated gauge\n");
        output.push_str(&format!(
            "objectpool_objects_allocated{{{}}} {}\n",
            labels, metrics.currently_allocated
        ));

        output.push_str("# HELP objectpool_utilization Pool utilization ratio\n");
        output.push_str("# TYPE objectpool_utilization gauge\n");
        output.push_str(&format!(
            "objectpool_utilization{{{}}} {:.2}\n",
            labels,
            metrics.utilization()
        ));

        // Counter metrics
        output.push_str("# HELP objectpool_allocated_total Instances ever allocated\n");
        output.push_str("# TYPE objectpool_allocated_total counter\n");
        output.push_str(&format!(
            "objectpool_allocated_total{{{}}} {}\n",
            labels, metrics.total_allocated
        ));

        output.push_str("# HELP objectpool_claimed_total Successful claims\n");
        output.push_str("# TYPE objectpool_claimed_total counter\n");
        output.push_str(&format!(
            "objectpool_claimed_total{{{}}} {}\n",
            labels, metrics.total_claimed
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolMetrics {
        PoolMetrics {
            currently_claimed: 3,
            currently_waiting_count: 1,
            core_poolsize: 2,
            max_poolsize: 4,
            currently_allocated: 4,
            total_allocated: 9,
            total_claimed: 27,
        }
    }

    #[test]
    fn export_contains_every_counter() {
        let exported = sample().export();
        assert_eq!(exported["currently_claimed"], "3");
        assert_eq!(exported["currently_waiting_count"], "1");
        assert_eq!(exported["currently_allocated"], "4");
        assert_eq!(exported["total_allocated"], "9");
        assert_eq!(exported["total_claimed"], "27");
        assert_eq!(exported["utilization"], "0.75");
    }

    #[test]
    fn prometheus_output_is_labelled() {
        let output = MetricsExporter::export_prometheus(&sample(), "db", None);
        assert!(output.contains("objectpool_objects_claimed{pool=\"db\"} 3"));
        assert!(output.contains("objectpool_claims_waiting{pool=\"db\"} 1"));
        assert!(output.contains("objectpool_allocated_total{pool=\"db\"} 9"));
        assert!(output.contains("objectpool_claimed_total{pool=\"db\"} 27"));
        assert!(output.contains("# TYPE objectpool_utilization gauge"));
    }

    #[test]
    fn utilization_handles_zero_capacity() {
        let mut metrics = sample();
        metrics.max_poolsize = 0;
        assert_eq!(metrics.utilization(), 0.0);
    }
}
