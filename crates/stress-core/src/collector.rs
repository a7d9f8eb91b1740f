// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Metrics collector: samples the probe at a fixed cadence, caches the latest snapshot,
//! and fans out per-execution metric points onto the event bus.

use crate::bus::{Event, EventBus};
use crate::model::{ExecutionId, SystemMetrics};
use crate::plugin::WorkloadPlugin;
use crate::probe::SystemProbe;
use dashmap::DashSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tunable cadence for global sampling.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CollectionConfig {
    #[serde(with = "duration_secs")]
    pub collection_interval: Duration,
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(5),
        }
    }
}

/// Samples the probe, caches the latest reading, and publishes it plus per-execution
/// metric points for subscribers (the safety monitor, external sinks).
pub struct MetricsCollector {
    config: CollectionConfig,
    probe: Arc<dyn SystemProbe>,
    bus: EventBus,
    latest: RwLock<SystemMetrics>,
    collecting: DashSet<ExecutionId>,
    cancel: CancellationToken,
}

impl MetricsCollector {
    pub fn new(config: CollectionConfig, probe: Arc<dyn SystemProbe>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            probe,
            bus,
            latest: RwLock::new(SystemMetrics::zero()),
            collecting: DashSet::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Begins the periodic global-sampling loop. Spawns its own task; call `stop` to end it.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.collection_interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = ticker.tick() => this.sample_once().await,
                }
            }
        });
    }

    /// Ends the periodic global-sampling loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn sample_once(&self) {
        match self.probe.read().await {
            Ok(snapshot) => {
                *self.latest.write() = snapshot;
                self.bus.publish(Event::MetricsSystem { snapshot });
            }
            Err(e) => {
                // Previous snapshot is retained; a failed sample never blanks the cache.
                warn!(error = %e, "probe sample failed, retaining previous snapshot");
            }
        }
    }

    /// Returns the most recently cached snapshot, read-while-write safe: callers always
    /// see either the previous or the new snapshot as a whole, never a partial write.
    pub fn get_latest(&self) -> SystemMetrics {
        *self.latest.read()
    }

    /// Marks an execution as actively collecting. Idempotent.
    pub fn start_collection(&self, execution_id: ExecutionId) {
        self.collecting.insert(execution_id);
    }

    /// Stops collection for an execution. Idempotent.
    pub fn stop_collection(&self, execution_id: ExecutionId) {
        self.collecting.remove(&execution_id);
    }

    /// Snapshots a plugin's current counters with a timestamp, publishing them tagged with
    /// the execution id if collection is active for it.
    pub fn collect_plugin_metrics(
        &self,
        execution_id: ExecutionId,
        plugin: &dyn WorkloadPlugin,
    ) -> HashMap<String, f64> {
        let fields = plugin.current_metrics();
        if self.collecting.contains(&execution_id) {
            self.bus.publish(Event::MetricsExecution {
                execution_id,
                fields: fields.clone(),
            });
        } else {
            debug!(%execution_id, "collection not active, dropping plugin metric fan-out");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FakeProbe;

    #[tokio::test]
    async fn test_get_latest_before_first_sample_is_zeroed() {
        let bus = EventBus::new();
        let probe = Arc::new(FakeProbe::new(SystemMetrics::zero()));
        let collector = MetricsCollector::new(CollectionConfig::default(), probe, bus);

        let latest = collector.get_latest();
        assert_eq!(latest.cpu_percent, 0.0);
    }

    #[tokio::test]
    async fn test_sample_once_updates_cache_and_publishes() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let probe = Arc::new(FakeProbe::new(SystemMetrics {
            cpu_percent: 42.0,
            ..SystemMetrics::zero()
        }));
        let collector = MetricsCollector::new(CollectionConfig::default(), probe, bus);

        collector.sample_once().await;
        assert_eq!(collector.get_latest().cpu_percent, 42.0);

        match rx.recv().await.unwrap() {
            Event::MetricsSystem { snapshot } => assert_eq!(snapshot.cpu_percent, 42.0),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_sample_retains_previous_snapshot() {
        let bus = EventBus::new();
        let probe = Arc::new(FakeProbe::new(SystemMetrics {
            cpu_percent: 10.0,
            ..SystemMetrics::zero()
        }));
        let collector = MetricsCollector::new(CollectionConfig::default(), probe.clone(), bus);

        collector.sample_once().await;
        assert_eq!(collector.get_latest().cpu_percent, 10.0);

        probe.fail_next_read();
        collector.sample_once().await;
        assert_eq!(collector.get_latest().cpu_percent, 10.0);
    }

    #[test]
    fn test_start_stop_collection_idempotent() {
        let bus = EventBus::new();
        let probe = Arc::new(FakeProbe::new(SystemMetrics::zero()));
        let collector = MetricsCollector::new(CollectionConfig::default(), probe, bus);
        let id = uuid::Uuid::new_v4();

        collector.start_collection(id);
        collector.start_collection(id);
        assert!(collector.collecting.contains(&id));

        collector.stop_collection(id);
        collector.stop_collection(id);
        assert!(!collector.collecting.contains(&id));
    }
}
