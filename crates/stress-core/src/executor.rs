// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Test orchestrator: starts, observes, and terminates test executions, enforcing the
//! execution state machine and guaranteeing cleanup on every exit path.

use crate::bus::{Event, EventBus};
use crate::collector::MetricsCollector;
use crate::config::GlobalSafetyCeiling;
use crate::error::{EngineError, Result};
use crate::metrics as telemetry;
use crate::model::{
    ExecutionId, ExecutionStatus, MetricPoint, SafetyLimits, TestConfiguration, TestExecution,
    TestParams,
};
use crate::plugin::WorkloadPlugin;
use crate::probe::SystemProbe;
use crate::registry::PluginRegistry;
use crate::safety::{MonitorConfig, SafetyMonitor};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Per-execution bookkeeping the orchestrator needs beyond the public `TestExecution`
/// record: the cancellation handle, and whether cancellation was user-requested (a
/// deadline firing naturally is not the same outcome as a StopTest call).
struct ExecutionHandle {
    cancel: CancellationToken,
    stop_requested: Arc<AtomicBool>,
}

/// Drives test executions. Owns the executions map and handle table exclusively;
/// everything else (registry, probe, bus, collector) is a shared handle constructed once
/// at process init and passed in.
pub struct TestOrchestrator {
    executions: DashMap<ExecutionId, Arc<RwLock<TestExecution>>>,
    handles: DashMap<ExecutionId, ExecutionHandle>,
    registry: Arc<PluginRegistry>,
    probe: Arc<dyn SystemProbe>,
    bus: EventBus,
    collector: Arc<MetricsCollector>,
    monitor_config: MonitorConfig,
    global_safety: GlobalSafetyCeiling,
}

impl TestOrchestrator {
    pub fn new(
        registry: Arc<PluginRegistry>,
        probe: Arc<dyn SystemProbe>,
        bus: EventBus,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            executions: DashMap::new(),
            handles: DashMap::new(),
            registry,
            probe,
            bus,
            collector,
            monitor_config: MonitorConfig::default(),
            global_safety: GlobalSafetyCeiling::default(),
        }
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn with_global_safety(mut self, ceiling: GlobalSafetyCeiling) -> Self {
        self.global_safety = ceiling;
        self
    }

    /// Validates params, resolves the plugin against the registry, registers the
    /// execution in Pending, spawns the driver task, and returns immediately.
    #[instrument(skip(self, config, params), fields(plugin = %config.plugin))]
    pub fn start_test(
        self: &Arc<Self>,
        config: TestConfiguration,
        params: TestParams,
    ) -> Result<ExecutionId> {
        params.validate()?;
        let plugin = self.registry.instantiate(&config.plugin)?;

        let execution_id = Uuid::new_v4();
        let execution = TestExecution::new(execution_id, config.clone());
        self.executions
            .insert(execution_id, Arc::new(RwLock::new(execution)));

        let cancel = CancellationToken::new();
        let stop_requested = Arc::new(AtomicBool::new(false));
        self.handles.insert(
            execution_id,
            ExecutionHandle {
                cancel: cancel.clone(),
                stop_requested: stop_requested.clone(),
            },
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(execution_id, plugin, config, params, cancel, stop_requested)
                .await;
        });

        Ok(execution_id)
    }

    /// Cancels a running execution cooperatively; the driver task observes cancellation
    /// and transitions to Stopped once the workload actually unwinds.
    pub fn stop_test(&self, execution_id: ExecutionId) -> Result<()> {
        let entry = self
            .executions
            .get(&execution_id)
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        if entry.read().status != ExecutionStatus::Running {
            return Err(EngineError::NotRunning(execution_id.to_string()));
        }
        if let Some(handle) = self.handles.get(&execution_id) {
            handle.stop_requested.store(true, Ordering::SeqCst);
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Cancels the execution and directly marks it Failed with `reason`, even if
    /// cancellation has not yet propagated to the driver task. Always succeeds if the
    /// execution exists, including when it has already reached a terminal state (in
    /// which case this is a no-op beyond the lookup).
    pub fn emergency_stop(&self, execution_id: ExecutionId, reason: String) -> Result<()> {
        let entry = self
            .executions
            .get(&execution_id)
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;

        if let Some(handle) = self.handles.get(&execution_id) {
            handle.cancel.cancel();
        }

        telemetry::record_emergency_stop("safety");
        self.finalize(&entry, ExecutionStatus::Failed, Some(reason));
        Ok(())
    }

    pub fn get_status(&self, execution_id: ExecutionId) -> Result<TestExecution> {
        self.executions
            .get(&execution_id)
            .map(|e| e.read().clone())
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
    }

    pub fn list_executions(&self) -> Vec<TestExecution> {
        self.executions.iter().map(|e| e.read().clone()).collect()
    }

    pub fn get_metrics(&self, execution_id: ExecutionId) -> Result<Vec<MetricPoint>> {
        self.executions
            .get(&execution_id)
            .map(|e| e.read().metrics.clone())
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
    }

    /// Removes terminal executions whose `end_time` is older than `max_age`. Returns the
    /// number removed. Running/Pending executions are never reaped.
    pub fn reap_completed(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;
        let to_remove: Vec<ExecutionId> = self
            .executions
            .iter()
            .filter_map(|entry| {
                let exec = entry.read();
                match exec.end_time {
                    Some(end) if exec.status.is_terminal() && end < cutoff => Some(exec.id),
                    _ => None,
                }
            })
            .collect();

        for id in &to_remove {
            self.executions.remove(id);
            self.handles.remove(id);
        }
        to_remove.len()
    }

    /// Writes a terminal status exactly once. A second call on an already-terminal
    /// execution is a no-op, enforcing "at most one terminal transition".
    fn finalize(
        &self,
        entry: &Arc<RwLock<TestExecution>>,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) {
        let (execution_id, plugin_name, duration, error) = {
            let mut exec = entry.write();
            if exec.status.is_terminal() {
                return;
            }
            exec.status = status;
            exec.end_time = Some(chrono::Utc::now());
            exec.error_message = error_message;
            (exec.id, exec.config.plugin.clone(), exec.duration(), exec.error_message.clone())
        };

        self.collector.stop_collection(execution_id);

        let status_label = match status {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Running | ExecutionStatus::Pending => "unknown",
        };
        telemetry::record_execution_complete(
            &plugin_name,
            status_label,
            duration.num_milliseconds() as f64 / 1000.0,
        );

        self.bus.publish(Event::ExecutionFinished {
            execution_id,
            status,
            duration,
            error,
        });
    }

    #[instrument(skip(self, plugin, config, params, cancel, stop_requested), fields(%execution_id))]
    async fn drive(
        self: Arc<Self>,
        execution_id: ExecutionId,
        plugin: Arc<dyn WorkloadPlugin>,
        config: TestConfiguration,
        params: TestParams,
        cancel: CancellationToken,
        stop_requested: Arc<AtomicBool>,
    ) {
        let entry = match self.executions.get(&execution_id) {
            Some(e) => Arc::clone(e.value()),
            None => return,
        };

        {
            let mut exec = entry.write();
            exec.status = ExecutionStatus::Running;
            exec.start_time = chrono::Utc::now();
        }
        telemetry::record_execution_start();
        self.bus.publish(Event::ExecutionStarted {
            execution_id,
            config_name: config.name.clone(),
        });
        self.collector.start_collection(execution_id);

        let effective_limits = self.effective_limits(plugin.as_ref(), config.safety_limits);
        let mut effective_monitor_config = self.monitor_config.clone();
        effective_monitor_config.emergency_threshold = effective_monitor_config
            .emergency_threshold
            .min(self.global_safety.emergency_stop_threshold);
        let (monitor, mut emergency_rx) =
            SafetyMonitor::new(effective_monitor_config, effective_limits);
        let monitor_cancel = cancel.child_token();
        let monitor_task = tokio::spawn(monitor.run(
            execution_id,
            Arc::clone(&self.probe),
            self.bus.clone(),
            monitor_cancel.clone(),
        ));

        let this_for_emergency = Arc::clone(&self);
        let emergency_task = tokio::spawn(async move {
            if let Some(reason) = emergency_rx.recv().await {
                let _ = this_for_emergency.emergency_stop(execution_id, reason.0);
            }
        });

        if let Err(e) = plugin.initialize(config.plugin_config.clone()).await {
            telemetry::record_plugin_operation(&config.plugin, "initialize", false);
            monitor_cancel.cancel();
            monitor_task.abort();
            emergency_task.abort();
            self.finalize(&entry, ExecutionStatus::Failed, Some(e.to_string()));
            return;
        }
        telemetry::record_plugin_operation(&config.plugin, "initialize", true);

        let deadline = tokio::time::Instant::now() + params.duration;
        let plugin_for_exec = Arc::clone(&plugin);
        let params_for_exec = params.clone();
        let exec_cancel = cancel.child_token();
        let workload_task = tokio::spawn({
            let exec_cancel = exec_cancel.clone();
            async move { plugin_for_exec.execute(params_for_exec, exec_cancel).await }
        });

        let outcome = tokio::select! {
            res = workload_task => Outcome::Finished(res),
            _ = tokio::time::sleep_until(deadline) => Outcome::DeadlineReached,
            _ = cancel.cancelled() => Outcome::ExternallyCancelled,
        };

        // Whichever branch won, make sure the workload and its watchers actually stop
        // before cleanup runs.
        exec_cancel.cancel();
        monitor_cancel.cancel();
        monitor_task.abort();
        emergency_task.abort();

        let cleanup_result = plugin.cleanup().await;
        if let Err(e) = &cleanup_result {
            warn!(%execution_id, error = %e, "plugin cleanup reported an error");
        }
        telemetry::record_plugin_operation(&config.plugin, "cleanup", cleanup_result.is_ok());

        // If an emergency stop fired, `finalize` already ran and this call is a no-op.
        match outcome {
            Outcome::Finished(Ok(Ok(()))) => {
                self.finalize(&entry, ExecutionStatus::Completed, None);
            }
            Outcome::Finished(Ok(Err(e))) if e.is_cancellation() => {
                let status = if stop_requested.load(Ordering::SeqCst) {
                    ExecutionStatus::Stopped
                } else {
                    ExecutionStatus::Completed
                };
                self.finalize(&entry, status, None);
            }
            Outcome::Finished(Ok(Err(e))) => {
                self.finalize(&entry, ExecutionStatus::Failed, Some(e.to_string()));
            }
            Outcome::Finished(Err(join_err)) => {
                error!(%execution_id, error = %join_err, "workload task faulted");
                self.finalize(
                    &entry,
                    ExecutionStatus::Failed,
                    Some(format!("workload faulted: {join_err}")),
                );
            }
            Outcome::DeadlineReached => {
                self.finalize(&entry, ExecutionStatus::Completed, None);
            }
            Outcome::ExternallyCancelled => {
                let status = if stop_requested.load(Ordering::SeqCst) {
                    ExecutionStatus::Stopped
                } else {
                    ExecutionStatus::Completed
                };
                self.finalize(&entry, status, None);
            }
        }

        info!(%execution_id, "execution finished");
    }

    /// Effective limits are the tightest of: the plugin's own declared limits, the
    /// orchestrator-wide ceiling, and the per-execution override the caller supplied in
    /// `TestConfiguration` — a configuration override can only tighten, never relax, the
    /// plugin's own ceiling.
    fn effective_limits(
        &self,
        plugin: &dyn WorkloadPlugin,
        config_override: Option<SafetyLimits>,
    ) -> SafetyLimits {
        let declared = plugin.declared_safety_limits();
        let ceiling = self
            .global_safety
            .as_safety_limits(declared.max_network_mbps);
        let mut effective = declared.tightest(&ceiling);
        if let Some(requested) = config_override {
            effective = effective.tightest(&requested);
        }
        effective
    }
}

enum Outcome {
    Finished(std::result::Result<Result<()>, tokio::task::JoinError>),
    DeadlineReached,
    ExternallyCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectionConfig;
    use crate::plugin::PluginDescriptor;
    use crate::probe::FakeProbe;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct RecordingPlugin {
        name: &'static str,
        cleanup_calls: Arc<AtomicUsize>,
        execute_delay: Duration,
        fail_execute: bool,
    }

    #[async_trait]
    impl WorkloadPlugin for RecordingPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn description(&self) -> &str {
            "test plugin"
        }
        fn config_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn initialize(&self, _config: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _params: TestParams, cancel: CancellationToken) -> Result<()> {
            if self.fail_execute {
                return Err(EngineError::plugin_fault(self.name, "boom"));
            }
            tokio::select! {
                _ = tokio::time::sleep(self.execute_delay) => Ok(()),
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
            }
        }
        async fn cleanup(&self) -> Result<()> {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn current_metrics(&self) -> HashMap<String, f64> {
            HashMap::new()
        }
        fn declared_safety_limits(&self) -> SafetyLimits {
            SafetyLimits {
                max_cpu_percent: 95.0,
                max_memory_percent: 20.0,
                max_disk_percent: 50.0,
                max_network_mbps: 10.0,
            }
        }
    }

    fn build_orchestrator(
        plugin_name: &'static str,
        execute_delay: Duration,
        fail_execute: bool,
    ) -> (Arc<TestOrchestrator>, Arc<AtomicUsize>) {
        let registry = Arc::new(PluginRegistry::new());
        let cleanup_calls = Arc::new(AtomicUsize::new(0));
        let cleanup_calls_clone = cleanup_calls.clone();
        registry.register(PluginDescriptor {
            name: plugin_name.to_string(),
            version: "1.0.0".into(),
            description: "test".into(),
            factory: Box::new(move || {
                Arc::new(RecordingPlugin {
                    name: plugin_name,
                    cleanup_calls: cleanup_calls_clone.clone(),
                    execute_delay,
                    fail_execute,
                })
            }),
        });

        let bus = EventBus::new();
        let probe: Arc<dyn SystemProbe> =
            Arc::new(FakeProbe::new(crate::model::SystemMetrics::zero()));
        let collector =
            MetricsCollector::new(CollectionConfig::default(), Arc::clone(&probe), bus.clone());
        let orchestrator = Arc::new(TestOrchestrator::new(registry, probe, bus, collector));
        (orchestrator, cleanup_calls)
    }

    fn test_config(plugin: &str, duration: Duration) -> (TestConfiguration, TestParams) {
        (
            TestConfiguration {
                name: "test".into(),
                plugin: plugin.to_string(),
                plugin_config: serde_json::json!({}),
                duration,
                safety_limits: None,
            },
            TestParams {
                duration,
                intensity: 50,
                concurrency: 1,
                ramp_up: false,
                custom: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let (orchestrator, cleanup_calls) =
            build_orchestrator("cpu-stress", Duration::from_millis(50), false);
        let (config, params) = test_config("cpu-stress", Duration::from_millis(200));

        let id = orchestrator.start_test(config, params).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = orchestrator.get_status(id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Completed);
        assert!(status.error_message.is_none());
        assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_mid_run() {
        let (orchestrator, cleanup_calls) =
            build_orchestrator("cpu-stress", Duration::from_secs(60), false);
        let (config, params) = test_config("cpu-stress", Duration::from_secs(60));

        let id = orchestrator.start_test(config, params).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        orchestrator.stop_test(id).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = orchestrator.get_status(id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Stopped);
        assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            orchestrator.stop_test(id),
            Err(EngineError::NotRunning(_))
        ));
    }

    #[test]
    fn test_effective_limits_takes_tightest_of_all_three() {
        let (orchestrator, _) =
            build_orchestrator("cpu-stress", Duration::from_millis(10), false);
        let plugin = RecordingPlugin {
            name: "cpu-stress",
            cleanup_calls: Arc::new(AtomicUsize::new(0)),
            execute_delay: Duration::from_millis(10),
            fail_execute: false,
        };

        // Declared limit and global ceiling both default around 95.0; the per-execution
        // override is the tightest at 40.0 and must win.
        let config_override = SafetyLimits {
            max_cpu_percent: 40.0,
            max_memory_percent: 90.0,
            max_disk_percent: 90.0,
            max_network_mbps: 90.0,
        };
        let effective = orchestrator.effective_limits(&plugin, Some(config_override));
        assert_eq!(effective.max_cpu_percent, 40.0);

        let unoverridden = orchestrator.effective_limits(&plugin, None);
        assert!(unoverridden.max_cpu_percent >= 40.0);
    }

    #[tokio::test]
    async fn test_unknown_plugin_rejected() {
        let (orchestrator, _) =
            build_orchestrator("cpu-stress", Duration::from_millis(50), false);
        let (mut config, params) = test_config("cpu-stress", Duration::from_millis(50));
        config.plugin = "does-not-exist".into();

        let before = orchestrator.list_executions().len();
        let result = orchestrator.start_test(config, params);
        assert!(matches!(result, Err(EngineError::UnknownPlugin(_))));
        assert_eq!(orchestrator.list_executions().len(), before);
    }

    #[tokio::test]
    async fn test_execute_error_marks_failed() {
        let (orchestrator, cleanup_calls) =
            build_orchestrator("cpu-stress", Duration::from_millis(10), true);
        let (config, params) = test_config("cpu-stress", Duration::from_millis(200));

        let id = orchestrator.start_test(config, params).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = orchestrator.get_status(id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert!(status.error_message.is_some());
        assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emergency_stop_marks_failed_with_reason() {
        let (orchestrator, _cleanup_calls) =
            build_orchestrator("cpu-stress", Duration::from_secs(60), false);
        let (config, params) = test_config("cpu-stress", Duration::from_secs(60));

        let id = orchestrator.start_test(config, params).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        orchestrator
            .emergency_stop(id, "critical safety violation: CPU at 99.0".into())
            .unwrap();

        let status = orchestrator.get_status(id).unwrap();
        assert_eq!(status.status, ExecutionStatus::Failed);
        assert!(status
            .error_message
            .unwrap()
            .contains("critical safety violation"));
    }

    #[tokio::test]
    async fn test_reap_completed_removes_only_old_terminal_executions() {
        let (orchestrator, _) =
            build_orchestrator("cpu-stress", Duration::from_millis(10), false);
        let (config, params) = test_config("cpu-stress", Duration::from_millis(50));

        let id = orchestrator.start_test(config, params).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Not old enough yet.
        assert_eq!(orchestrator.reap_completed(chrono::Duration::hours(1)), 0);
        assert!(orchestrator.get_status(id).is_ok());

        // Zero max_age removes it immediately; repeating is idempotent.
        assert_eq!(orchestrator.reap_completed(chrono::Duration::zero()), 1);
        assert_eq!(orchestrator.reap_completed(chrono::Duration::zero()), 0);
        assert!(matches!(
            orchestrator.get_status(id),
            Err(EngineError::NotFound(_))
        ));
    }
}
