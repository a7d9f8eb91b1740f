// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Workload plugin contract. Concrete kinds (CPU, Memory, I/O) live in the
//! `stress-plugins` crate.

use crate::error::Result;
use crate::model::{SafetyLimits, TestParams};
use async_trait::async_trait;
use std::collections::HashMap;

/// A polymorphic stressor: initialise, run, clean up, report metrics, declare the safety
/// envelope it expects to stay within, and health-check itself.
#[async_trait]
pub trait WorkloadPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    /// Machine-readable description of accepted configuration keys, for external validators.
    fn config_schema(&self) -> serde_json::Value;

    /// Parses and validates `plugin_config`, sets defaults, reserves scratch state.
    /// Must be idempotent with respect to `cleanup`.
    async fn initialize(&self, plugin_config: serde_json::Value) -> Result<()>;

    /// Runs the workload until `params.duration` elapses or `cancel` fires. Must
    /// cooperatively observe cancellation at intervals of at most 1 second.
    async fn execute(&self, params: TestParams, cancel: tokio_util::sync::CancellationToken) -> Result<()>;

    /// Releases all resources acquired in `initialize`/`execute`. Must be safe to call even
    /// if `initialize` was never called or `execute` was cancelled mid-way.
    async fn cleanup(&self) -> Result<()>;

    /// Snapshot of plugin-specific counters.
    fn current_metrics(&self) -> HashMap<String, f64>;

    /// Advisory upper bound the workload considers acceptable.
    fn declared_safety_limits(&self) -> SafetyLimits;

    /// Quick self-test (<=100ms) verifying the plugin can run. Default: always healthy.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Static, name-keyed description of a registered plugin, shared read-only between the
/// registry and the orchestrator.
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub factory: Box<dyn Fn() -> std::sync::Arc<dyn WorkloadPlugin> + Send + Sync>,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}
