// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! External configuration surface consumed by the engine.
//!
//! These structs are the typed contract; parsing them out of a file format, overlaying
//! environment variables, and hot-reloading are the external loader's job.

use crate::model::SafetyLimits;
use crate::safety::MonitorConfig;
use serde::{Deserialize, Serialize};

/// Global ceiling applied in addition to whatever the selected plugin declares.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalSafetyCeiling {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_disk_percent: f64,
    pub emergency_stop_threshold: f64,
}

impl Default for GlobalSafetyCeiling {
    fn default() -> Self {
        Self {
            max_cpu_percent: 95.0,
            max_memory_percent: 90.0,
            max_disk_percent: 95.0,
            emergency_stop_threshold: 98.0,
        }
    }
}

impl GlobalSafetyCeiling {
    /// Converts the ceiling into a `SafetyLimits` value comparable against a plugin's
    /// declared limits via `SafetyLimits::tightest`.
    pub fn as_safety_limits(&self, max_network_mbps: f64) -> SafetyLimits {
        SafetyLimits {
            max_cpu_percent: self.max_cpu_percent,
            max_memory_percent: self.max_memory_percent,
            max_disk_percent: self.max_disk_percent,
            max_network_mbps,
        }
    }
}

/// Top-level engine configuration, assembled by the embedding application (e.g. from a
/// YAML file loaded with `serde_yaml`, or environment variables) and handed to
/// `TestOrchestrator::new`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub monitor: MonitorConfigDto,
    #[serde(default)]
    pub global_safety: GlobalSafetyCeiling,
    #[serde(default)]
    pub collection: crate::collector::CollectionConfig,
}

/// Serde-friendly mirror of `MonitorConfig` (whose `Duration` fields need explicit
/// seconds-based (de)serialization).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfigDto {
    pub check_interval_secs: u64,
    pub alert_threshold: f64,
    pub emergency_threshold: f64,
    pub ramp_up_duration_secs: u64,
    pub ramp_up_steps: u32,
    pub cooldown_period_secs: u64,
    pub max_violations_per_min: usize,
    pub auto_stop_enabled: bool,
}

impl Default for MonitorConfigDto {
    fn default() -> Self {
        let defaults = MonitorConfig::default();
        Self {
            check_interval_secs: defaults.check_interval.as_secs(),
            alert_threshold: defaults.alert_threshold,
            emergency_threshold: defaults.emergency_threshold,
            ramp_up_duration_secs: defaults.ramp_up_duration.as_secs(),
            ramp_up_steps: defaults.ramp_up_steps,
            cooldown_period_secs: defaults.cooldown_period.as_secs(),
            max_violations_per_min: defaults.max_violations_per_min,
            auto_stop_enabled: defaults.auto_stop_enabled,
        }
    }
}

impl From<MonitorConfigDto> for MonitorConfig {
    fn from(dto: MonitorConfigDto) -> Self {
        Self {
            check_interval: std::time::Duration::from_secs(dto.check_interval_secs),
            alert_threshold: dto.alert_threshold,
            emergency_threshold: dto.emergency_threshold,
            ramp_up_duration: std::time::Duration::from_secs(dto.ramp_up_duration_secs),
            ramp_up_steps: dto.ramp_up_steps,
            cooldown_period: std::time::Duration::from_secs(dto.cooldown_period_secs),
            max_violations_per_min: dto.max_violations_per_min,
            auto_stop_enabled: dto.auto_stop_enabled,
        }
    }
}
