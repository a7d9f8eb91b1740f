// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Core data model: test configuration, execution records, metrics and violations.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque identifier for a test execution.
pub type ExecutionId = Uuid;

/// A declarative description of a test to run, supplied by the external caller.
///
/// Immutable once a test has started; storage is owned externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Human-readable name for this configuration.
    pub name: String,

    /// Name of the plugin to run, resolved against the registry.
    pub plugin: String,

    /// Plugin-specific configuration, validated by the plugin's `initialize`.
    pub plugin_config: serde_json::Value,

    /// Total duration of the test.
    pub duration: std::time::Duration,

    /// Safety limits requested by the caller. Tighter than the plugin's declared
    /// limits always wins; looser never relaxes the plugin's own ceiling.
    #[serde(default)]
    pub safety_limits: Option<SafetyLimits>,
}

/// Run-time parameters for a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParams {
    /// Total duration of the run.
    pub duration: std::time::Duration,

    /// Target intensity, 1-100.
    pub intensity: u8,

    /// Number of concurrent worker tasks.
    pub concurrency: usize,

    /// Whether to ramp intensity up linearly at the start of the run.
    #[serde(default = "default_true")]
    pub ramp_up: bool,

    /// Plugin-specific overrides layered on top of `plugin_config`.
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl TestParams {
    /// Validates concurrency and intensity bounds.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(EngineError::invalid_config("concurrency must be >= 1"));
        }
        if self.intensity > 100 {
            return Err(EngineError::invalid_config("intensity must be <= 100"));
        }
        Ok(())
    }
}

/// Upper bounds on host resource usage a test is allowed to cause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SafetyLimits {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_disk_percent: f64,
    pub max_network_mbps: f64,
}

impl SafetyLimits {
    /// Combines two limit sets, keeping the tighter (lower) bound per field.
    pub fn tightest(&self, other: &SafetyLimits) -> SafetyLimits {
        SafetyLimits {
            max_cpu_percent: self.max_cpu_percent.min(other.max_cpu_percent),
            max_memory_percent: self.max_memory_percent.min(other.max_memory_percent),
            max_disk_percent: self.max_disk_percent.min(other.max_disk_percent),
            max_network_mbps: self.max_network_mbps.min(other.max_network_mbps),
        }
    }
}

/// Lifecycle state of a test execution.
///
/// Monotonic: Pending -> Running -> one of {Completed, Failed, Stopped}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    /// True for Completed, Failed, Stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// A single test execution record, owned exclusively by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecution {
    pub id: ExecutionId,
    pub config: TestConfiguration,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub metrics: Vec<MetricPoint>,
}

impl TestExecution {
    pub fn new(id: ExecutionId, config: TestConfiguration) -> Self {
        Self {
            id,
            config,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            metrics: Vec::new(),
        }
    }

    /// Duration: end_time - start_time when terminal, elapsed otherwise.
    pub fn duration(&self) -> chrono::Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        end - self.start_time
    }
}

/// A single timestamped measurement, tagged with the execution it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub execution_id: ExecutionId,
    pub source: String,
    pub measurement: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub fields: HashMap<String, MetricValue>,
}

/// A numeric or boolean metric field value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Bool(bool),
}

/// A snapshot of host resource utilisation produced by the collector each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_bytes_total: u64,
    pub temperature_celsius: f64,
    /// False when the temperature reading is a synthetic fallback, not a real sensor.
    pub thermal_authoritative: bool,
}

impl SystemMetrics {
    /// A metrics snapshot with all fields zeroed, used before the first probe read.
    pub fn zero() -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            network_bytes_total: 0,
            temperature_celsius: 35.0,
            thermal_authoritative: false,
        }
    }
}

/// Severity class of a recorded violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// The metric a violation was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    Cpu,
    Memory,
    Disk,
    Network,
    Temperature,
    ViolationRate,
    MemoryPressure,
}

/// A single observation that a metric exceeded its configured limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub observed: f64,
    pub limit: f64,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub critical: bool,
}

/// A subscriber-facing notification derived from a Violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: ViolationKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<&Violation> for Alert {
    fn from(v: &Violation) -> Self {
        Self {
            kind: v.kind,
            message: v.message.clone(),
            severity: v.severity,
            timestamp: v.timestamp,
            metadata: HashMap::new(),
        }
    }
}
