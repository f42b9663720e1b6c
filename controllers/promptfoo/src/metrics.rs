//! Prometheus metrics for reconciliation passes and child writes

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Metrics recorded by the reconciler
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,

    /// Reconciliation passes by result
    pub reconcile_total: IntCounterVec,

    /// Child create/update/unchanged outcomes
    pub child_operations_total: IntCounterVec,

    /// Duration of a reconciliation pass
    pub reconcile_duration_seconds: Histogram,
}

impl Metrics {
    /// Create the metrics and register them in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("promptfoo_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let child_operations_total = IntCounterVec::new(
            Opts::new(
                "promptfoo_child_operations_total",
                "Create-or-update outcomes for ConfigMaps and CronJobs",
            ),
            &["child", "operation"],
        )?;
        registry.register(Box::new(child_operations_total.clone()))?;

        let reconcile_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "promptfoo_reconcile_duration_seconds",
                "Duration of a reconciliation pass",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            child_operations_total,
            reconcile_duration_seconds,
        })
    }

    /// Record the end of a reconciliation pass
    pub fn record_reconcile(&self, result: &str, duration_secs: f64) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration_seconds.observe(duration_secs);
    }

    /// Record the outcome of one create-or-update call
    pub fn record_child_operation(&self, child: &str, operation: &str) {
        self.child_operations_total
            .with_label_values(&[child, operation])
            .inc();
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("success", 0.02);
        metrics.record_child_operation("ConfigMap", "created");
        metrics.record_child_operation("ConfigMap", "created");

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"promptfoo_reconcile_total{result="success"} 1"#));
        assert!(text.contains(r#"promptfoo_child_operations_total{child="ConfigMap",operation="created"} 2"#));
        assert!(text.contains("promptfoo_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_reconcile("success", 0.1);

        assert_eq!(first.reconcile_total.with_label_values(&["success"]).get(), 1);
        assert_eq!(second.reconcile_total.with_label_values(&["success"]).get(), 0);
    }
}
