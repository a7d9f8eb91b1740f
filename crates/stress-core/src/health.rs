// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Ambient health surface: answers "can the engine accept new tests right now", as
//! distinct from a workload plugin's own `health_check()` lifecycle method.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: HashMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health status of an individual component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_check: chrono::DateTime<chrono::Utc>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: None,
            error: None,
            last_check: chrono::Utc::now(),
        }
    }

    pub fn healthy_with_time(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            error: None,
            last_check: chrono::Utc::now(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            response_time_ms: None,
            error: Some(message.into()),
            last_check: chrono::Utc::now(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error: Some(error.into()),
            last_check: chrono::Utc::now(),
        }
    }
}

/// Trait for components that can be health-checked.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check_health(&self) -> ComponentHealth;
    fn component_name(&self) -> &str;
}

/// Aggregates component health checks into one overall status.
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn register(&mut self, check: Arc<dyn HealthCheck>) {
        self.checks.push(check);
    }

    /// Runs all registered checks in parallel and folds them into an overall status:
    /// any Unhealthy wins, else any Degraded, else Healthy.
    pub async fn check_all(&self) -> HealthCheckResult {
        let mut checks = HashMap::new();
        let mut overall_status = HealthStatus::Healthy;

        let futures: Vec<_> = self
            .checks
            .iter()
            .map(|check| async move {
                let name = check.component_name().to_string();
                let result = check.check_health().await;
                (name, result)
            })
            .collect();

        let results = futures::future::join_all(futures).await;

        for (name, result) in results {
            match result.status {
                HealthStatus::Unhealthy => overall_status = HealthStatus::Unhealthy,
                HealthStatus::Degraded if overall_status != HealthStatus::Unhealthy => {
                    overall_status = HealthStatus::Degraded;
                }
                _ => {}
            }
            checks.insert(name, result);
        }

        HealthCheckResult {
            status: overall_status,
            timestamp: chrono::Utc::now(),
            checks,
            message: None,
        }
    }

    /// Lightweight liveness check: verifies the process is running, no dependency checks.
    pub fn liveness(&self) -> HealthCheckResult {
        HealthCheckResult {
            status: HealthStatus::Healthy,
            timestamp: chrono::Utc::now(),
            checks: HashMap::new(),
            message: Some("engine process is alive".to_string()),
        }
    }

    /// Alias for `check_all()`: is the engine ready to accept `StartTest` calls.
    pub async fn readiness(&self) -> HealthCheckResult {
        self.check_all().await
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies the system probe can still produce a reading.
pub struct ProbeHealthCheck {
    probe: Arc<dyn crate::probe::SystemProbe>,
}

impl ProbeHealthCheck {
    pub fn new(probe: Arc<dyn crate::probe::SystemProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheck for ProbeHealthCheck {
    async fn check_health(&self) -> ComponentHealth {
        let start = std::time::Instant::now();
        match self.probe.read().await {
            Ok(_) => ComponentHealth::healthy_with_time(start.elapsed().as_millis() as u64),
            Err(e) => ComponentHealth::degraded(format!("probe read failed: {e}")),
        }
    }

    fn component_name(&self) -> &str {
        "probe"
    }
}

/// Verifies at least one workload plugin is registered.
pub struct RegistryHealthCheck {
    registry: Arc<crate::registry::PluginRegistry>,
}

impl RegistryHealthCheck {
    pub fn new(registry: Arc<crate::registry::PluginRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthCheck for RegistryHealthCheck {
    async fn check_health(&self) -> ComponentHealth {
        if self.registry.list().is_empty() {
            ComponentHealth::unhealthy("no workload plugins registered")
        } else {
            ComponentHealth::healthy()
        }
    }

    fn component_name(&self) -> &str {
        "registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_health_constructors() {
        let healthy = ComponentHealth::healthy();
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert!(healthy.error.is_none());

        let degraded = ComponentHealth::degraded("slow response");
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.error.is_some());

        let unhealthy = ComponentHealth::unhealthy("connection failed");
        assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
        assert!(unhealthy.error.is_some());
    }

    #[tokio::test]
    async fn test_health_checker_liveness() {
        let checker = HealthChecker::new();
        let result = checker.liveness();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.checks.is_empty());
    }

    #[tokio::test]
    async fn test_registry_health_check_unhealthy_when_empty() {
        let registry = Arc::new(crate::registry::PluginRegistry::new());
        let mut checker = HealthChecker::new();
        checker.register(Arc::new(RegistryHealthCheck::new(registry)));

        let result = checker.check_all().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_health_check_result_serialization() {
        let mut checks = HashMap::new();
        checks.insert("test".to_string(), ComponentHealth::healthy_with_time(42));

        let result = HealthCheckResult {
            status: HealthStatus::Healthy,
            timestamp: chrono::Utc::now(),
            checks,
            message: Some("all systems operational".to_string()),
        };

        let json = serde_json::to_string_pretty(&result).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("test"));
    }
}
