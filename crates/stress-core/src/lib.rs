// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Stress Core - system stress-testing engine.
//!
//! Provides the orchestrator, safety monitor, metrics collector, plugin registry and
//! event bus that drive workload plugins (CPU/memory/I-O, implemented in the
//! `stress-plugins` crate) against a host within a configured safety envelope.
//!
//! # Example
//!
//! ```no_run
//! use stress_core::config::EngineConfig;
//! use stress_core::model::{TestConfiguration, TestParams};
//! use stress_core::{EventBus, MetricsCollector, PluginRegistry, TestOrchestrator};
//! use stress_core::probe::HostProbe;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(PluginRegistry::new());
//! // real deployments register concrete plugins from `stress-plugins` here
//!
//! let probe = Arc::new(HostProbe::new());
//! let bus = EventBus::new();
//! let collector = MetricsCollector::new(Default::default(), probe.clone(), bus.clone());
//! let orchestrator = Arc::new(TestOrchestrator::new(registry, probe, bus, collector));
//!
//! let config = TestConfiguration {
//!     name: "smoke-test".into(),
//!     plugin: "cpu-stress".into(),
//!     plugin_config: serde_json::json!({}),
//!     duration: Duration::from_secs(30),
//!     safety_limits: None,
//! };
//! let params = TestParams {
//!     duration: Duration::from_secs(30),
//!     intensity: 50,
//!     concurrency: 2,
//!     ramp_up: true,
//!     custom: HashMap::new(),
//! };
//! let _execution_id = orchestrator.start_test(config, params)?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod model;
pub mod plugin;
pub mod probe;
pub mod registry;
pub mod retry;
pub mod safety;

pub use bus::{Event, EventBus};
pub use collector::{CollectionConfig, MetricsCollector};
pub use error::{EngineError, Result};
pub use executor::TestOrchestrator;
pub use plugin::{PluginDescriptor, WorkloadPlugin};
pub use registry::PluginRegistry;
pub use retry::{RetryExecutor, RetryPolicy};
pub use safety::{MonitorConfig, SafetyMonitor};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'));
        assert_eq!(NAME, "stress-core");
    }
}
