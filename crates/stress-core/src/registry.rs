// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Name-keyed lookup of available workload plugins.

use crate::error::{EngineError, Result};
use crate::plugin::{PluginDescriptor, WorkloadPlugin};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Plugin descriptors, populated once at process init and treated as read-only thereafter
/// from the orchestrator's perspective.
#[derive(Default)]
pub struct PluginRegistry {
    descriptors: DashMap<String, Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin descriptor. Re-registering a name replaces the prior entry.
    pub fn register(&self, descriptor: PluginDescriptor) {
        info!(plugin = %descriptor.name, "registering workload plugin");
        self.descriptors
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    /// Looks up a descriptor by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        self.descriptors.get(name).map(|e| e.value().clone())
    }

    /// Creates a fresh plugin instance for a new execution.
    pub fn instantiate(&self, name: &str) -> Result<Arc<dyn WorkloadPlugin>> {
        let descriptor = self
            .lookup(name)
            .ok_or_else(|| EngineError::UnknownPlugin(name.to_string()))?;
        Ok((descriptor.factory)())
    }

    /// Lists all registered plugin names.
    pub fn list(&self) -> Vec<String> {
        self.descriptors.iter().map(|e| e.key().clone()).collect()
    }

    /// Runs `health_check` against a fresh instance of every registered plugin, retrying
    /// transient failures. An ambient maintenance operation, not part of any execution's
    /// lifecycle.
    pub async fn health_check_all(&self) -> Vec<(String, Result<()>)> {
        let policy = crate::retry::RetryPolicy::fixed_delay(2, std::time::Duration::from_millis(50));
        let mut results = Vec::new();
        for name in self.list() {
            let executor = crate::retry::RetryExecutor::new(policy.clone());
            let outcome = executor
                .execute(|| {
                    let plugin = self.instantiate(&name);
                    async move { plugin?.health_check().await }
                })
                .await;
            results.push((name, outcome));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SafetyLimits, TestParams};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NoopPlugin;

    #[async_trait]
    impl WorkloadPlugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn config_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn initialize(&self, _config: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn execute(
            &self,
            _params: TestParams,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> Result<()> {
            Ok(())
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
        fn current_metrics(&self) -> HashMap<String, f64> {
            HashMap::new()
        }
        fn declared_safety_limits(&self) -> SafetyLimits {
            SafetyLimits {
                max_cpu_percent: 100.0,
                max_memory_percent: 100.0,
                max_disk_percent: 100.0,
                max_network_mbps: 100.0,
            }
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PluginRegistry::new();
        registry.register(PluginDescriptor {
            name: "noop".into(),
            version: "1.0.0".into(),
            description: "does nothing".into(),
            factory: Box::new(|| Arc::new(NoopPlugin)),
        });

        assert!(registry.lookup("noop").is_some());
        assert!(registry.lookup("missing").is_none());
        assert_eq!(registry.list(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_reregistration_replaces_entry() {
        let registry = PluginRegistry::new();
        registry.register(PluginDescriptor {
            name: "noop".into(),
            version: "1.0.0".into(),
            description: "v1".into(),
            factory: Box::new(|| Arc::new(NoopPlugin)),
        });
        registry.register(PluginDescriptor {
            name: "noop".into(),
            version: "2.0.0".into(),
            description: "v2".into(),
            factory: Box::new(|| Arc::new(NoopPlugin)),
        });

        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.lookup("noop").unwrap().version, "2.0.0");
    }

    #[test]
    fn test_instantiate_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.instantiate("missing"),
            Err(EngineError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let registry = PluginRegistry::new();
        registry.register(PluginDescriptor {
            name: "noop".into(),
            version: "1.0.0".into(),
            description: "does nothing".into(),
            factory: Box::new(|| Arc::new(NoopPlugin)),
        });

        let results = registry.health_check_all().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
    }
}
