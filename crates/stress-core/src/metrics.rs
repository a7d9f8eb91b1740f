// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics instrumentation for the stress engine.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, Registry, TextEncoder,
};

lazy_static! {
    /// Total test executions by status and plugin name.
    pub static ref EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "stress_executions_total",
        "Total number of test executions",
        &["status", "plugin"]
    )
    .expect("failed to create executions_total metric");

    /// Test execution duration in seconds.
    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "stress_execution_duration_seconds",
        "Test execution duration in seconds",
        &["plugin"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]
    )
    .expect("failed to create execution_duration_seconds metric");

    /// Number of currently running executions.
    pub static ref ACTIVE_EXECUTIONS: Gauge = register_gauge!(
        "stress_active_executions",
        "Number of currently running test executions"
    )
    .expect("failed to create active_executions metric");

    /// Total violations recorded by kind and severity.
    pub static ref VIOLATIONS_TOTAL: CounterVec = register_counter_vec!(
        "stress_violations_total",
        "Total safety violations recorded",
        &["kind", "severity"]
    )
    .expect("failed to create violations_total metric");

    /// Total emergency stops raised, by reason category.
    pub static ref EMERGENCY_STOPS_TOTAL: CounterVec = register_counter_vec!(
        "stress_emergency_stops_total",
        "Total emergency stops raised",
        &["reason"]
    )
    .expect("failed to create emergency_stops_total metric");

    /// Total plugin operations by plugin and outcome.
    pub static ref PLUGIN_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "stress_plugin_operations_total",
        "Total plugin lifecycle operations",
        &["plugin", "operation", "outcome"]
    )
    .expect("failed to create plugin_operations_total metric");
}

/// Records the start of an execution.
#[inline]
pub fn record_execution_start() {
    ACTIVE_EXECUTIONS.inc();
}

/// Records the completion of an execution (any terminal status).
#[inline]
pub fn record_execution_complete(plugin: &str, status: &str, duration_seconds: f64) {
    ACTIVE_EXECUTIONS.dec();
    EXECUTIONS_TOTAL.with_label_values(&[status, plugin]).inc();
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[plugin])
        .observe(duration_seconds);
}

/// Records a recorded violation.
#[inline]
pub fn record_violation(kind: &str, severity: &str) {
    VIOLATIONS_TOTAL.with_label_values(&[kind, severity]).inc();
}

/// Records an emergency stop.
#[inline]
pub fn record_emergency_stop(reason: &str) {
    EMERGENCY_STOPS_TOTAL.with_label_values(&[reason]).inc();
}

/// Records a plugin lifecycle operation outcome.
#[inline]
pub fn record_plugin_operation(plugin: &str, operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PLUGIN_OPERATIONS_TOTAL
        .with_label_values(&[plugin, operation, outcome])
        .inc();
}

/// Gathers and encodes all metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("failed to encode metrics");

    String::from_utf8(buffer).expect("metrics encoding produced invalid UTF-8")
}

/// Creates a custom Prometheus registry with all engine metrics, for applications that
/// need to integrate with an existing metrics system rather than the global default.
pub fn create_registry() -> Registry {
    let registry = Registry::new();

    registry
        .register(Box::new(EXECUTIONS_TOTAL.clone()))
        .expect("failed to register executions_total");
    registry
        .register(Box::new(EXECUTION_DURATION_SECONDS.clone()))
        .expect("failed to register execution_duration_seconds");
    registry
        .register(Box::new(ACTIVE_EXECUTIONS.clone()))
        .expect("failed to register active_executions");
    registry
        .register(Box::new(VIOLATIONS_TOTAL.clone()))
        .expect("failed to register violations_total");
    registry
        .register(Box::new(EMERGENCY_STOPS_TOTAL.clone()))
        .expect("failed to register emergency_stops_total");
    registry
        .register(Box::new(PLUGIN_OPERATIONS_TOTAL.clone()))
        .expect("failed to register plugin_operations_total");

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_metrics() {
        record_execution_start();
        let active = ACTIVE_EXECUTIONS.get();
        assert!(active >= 1.0);

        record_execution_complete("cpu-stress", "completed", 2.1);
        assert_eq!(ACTIVE_EXECUTIONS.get(), active - 1.0);
    }

    #[test]
    fn test_violation_metrics() {
        record_violation("cpu", "critical");
        let count = VIOLATIONS_TOTAL.with_label_values(&["cpu", "critical"]).get();
        assert!(count >= 1.0);
    }

    #[test]
    fn test_gather_metrics_contains_known_series() {
        record_execution_start();
        record_execution_complete("cpu-stress", "completed", 1.0);

        let text = gather_metrics();
        assert!(text.contains("stress_executions_total"));
        assert!(text.contains("stress_active_executions"));
    }

    #[test]
    fn test_create_registry() {
        let registry = create_registry();
        let families = registry.gather();
        assert!(families.len() <= 6);
    }
}
