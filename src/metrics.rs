//! Metrics collection and export for connection pools

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use resilient_pool::{ConnectionPool, PoolConfig};
/// # use resilient_pool::{Connection, ConnectionError, Cursor};
/// # struct Db;
/// # struct Cur;
/// # impl Cursor for Cur {
/// #     fn execute(&mut self, _: &str) -> Result<u64, ConnectionError> { Ok(1) }
/// # }
/// # impl Connection for Db {
/// #     fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> { Ok(Box::new(Cur)) }
/// #     fn close(&mut self) -> Result<(), ConnectionError> { Ok(()) }
/// #     fn rollback(&mut self) -> Result<(), ConnectionError> { Ok(()) }
/// # }
///
/// let pool = ConnectionPool::new(|| Ok(Db), PoolConfig::default());
///
/// {
///     let _conn = pool.get_connection().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.total_acquired, 1);
///     assert_eq!(metrics.in_use_connections, 1);
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    /// Connections successfully created by the factory
    pub connections_created: usize,

    /// Factory calls that failed
    pub creation_failures: usize,

    /// Connections closed because they were dead, expired or failed rollback
    pub connections_discarded: usize,

    /// Successful checkouts
    pub total_acquired: usize,

    /// Connections returned to the ready-queue
    pub total_released: usize,

    /// Acquisitions that gave up after the pool timeout
    pub exhaustion_events: usize,

    /// Live connections
    pub total_connections: usize,

    /// Idle connections in the ready-queue
    pub available_connections: usize,

    /// Connections checked out
    pub in_use_connections: usize,

    /// Callers blocked waiting for a connection
    pub waiting: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,

    pub max_connections: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("connections_discarded".to_string(), self.connections_discarded.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("exhaustion_events".to_string(), self.exhaustion_events.to_string());
        metrics.insert("total_connections".to_string(), self.total_connections.to_string());
        metrics.insert("available_connections".to_string(), self.available_connections.to_string());
        metrics.insert("in_use_connections".to_string(), self.in_use_connections.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_connections".to_string(), self.max_connections.to_string());
        metrics
    }
}

/// Occupancy snapshot of a pool, as shown on dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub in_use_connections: usize,
    pub max_connections: usize,
    pub is_closed: bool,
}

impl PoolStats {
    /// Whether every slot is taken by a checked-out connection
    pub fn is_saturated(&self) -> bool {
        self.in_use_connections >= self.max_connections
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format.
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::errors::PoolResult<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let build = || -> prometheus::Result<Registry> {
            let registry = Registry::new_custom(Some("connpool".to_string()), Some(labels))?;

            let gauges = [
                ("connections_total", "Live connections", metrics.total_connections),
                ("connections_available", "Idle connections", metrics.available_connections),
                ("connections_in_use", "Connections checked out", metrics.in_use_connections),
                ("connections_max", "Pool capacity", metrics.max_connections),
                ("waiting", "Callers waiting for a connection", metrics.waiting),
            ];
            for (name, help, value) in gauges {
                let gauge = IntGauge::new(name, help)?;
                gauge.set(value as i64);
                registry.register(Box::new(gauge))?;
            }

            let utilization = Gauge::new("utilization", "Pool utilization ratio")?;
            utilization.set(metrics.utilization);
            registry.register(Box::new(utilization))?;

            let counters = [
                ("connections_created_total", "Connections created", metrics.connections_created),
                ("creation_failures_total", "Failed connection attempts", metrics.creation_failures),
                ("connections_discarded_total", "Connections discarded", metrics.connections_discarded),
                ("acquired_total", "Successful checkouts", metrics.total_acquired),
                ("released_total", "Connections returned", metrics.total_released),
                ("exhausted_total", "Acquisitions that timed out", metrics.exhaustion_events),
            ];
            for (name, help, value) in counters {
                let counter = IntCounter::new(name, help)?;
                counter.inc_by(value as u64);
                registry.register(Box::new(counter))?;
            }

            Ok(registry)
        };

        let registry = build().map_err(|e| crate::errors::PoolError::Metrics(e.to_string()))?;
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| crate::errors::PoolError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| crate::errors::PoolError::Metrics(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub connections_created: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub connections_discarded: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub exhaustion_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_metrics(
        &self,
        total: usize,
        available: usize,
        in_use: usize,
        waiting: usize,
        capacity: usize,
    ) -> PoolMetrics {
        let utilization = if capacity > 0 {
            in_use as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            connections_discarded: self.connections_discarded.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            exhaustion_events: self.exhaustion_events.load(Ordering::Relaxed),
            total_connections: total,
            available_connections: available,
            in_use_connections: in_use,
            waiting,
            utilization,
            max_connections: capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_against_capacity() {
        let tracker = MetricsTracker::new();
        tracker.total_acquired.fetch_add(3, Ordering::Relaxed);

        let metrics = tracker.get_metrics(2, 0, 2, 1, 4);
        assert_eq!(metrics.total_acquired, 3);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.export()["utilization"], "0.50");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_output_carries_labels() {
        let metrics = MetricsTracker::new().get_metrics(1, 0, 1, 0, 3);
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "items".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "content", Some(&tags)).unwrap();
        assert!(output.contains("connpool_connections_in_use"));
        assert!(output.contains("pool=\"content\""));
        assert!(output.contains("service=\"items\""));
    }
}
