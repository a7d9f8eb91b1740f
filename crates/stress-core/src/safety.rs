// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Safety monitor: evaluates probe readings against configured limits, records
//! violations, and raises emergency-stop signals.

use crate::bus::{Event, EventBus};
use crate::model::{Alert, SafetyLimits, Severity, SystemMetrics, Violation, ViolationKind};
use crate::probe::SystemProbe;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const VIOLATION_RETENTION: chrono::Duration = chrono::Duration::hours(1);
const EMERGENCY_CHANNEL_CAPACITY: usize = 4;

const TEMP_WARNING_C: f64 = 85.0;
const TEMP_CRITICAL_C: f64 = 90.0;

/// Tunable parameters for the safety monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub alert_threshold: f64,
    pub emergency_threshold: f64,
    pub ramp_up_duration: Duration,
    pub ramp_up_steps: u32,
    pub cooldown_period: Duration,
    pub max_violations_per_min: usize,
    pub auto_stop_enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            alert_threshold: 85.0,
            emergency_threshold: 95.0,
            ramp_up_duration: Duration::from_secs(30),
            ramp_up_steps: 10,
            cooldown_period: Duration::from_secs(60),
            max_violations_per_min: 5,
            auto_stop_enabled: true,
        }
    }
}

/// Reason an emergency stop was raised.
#[derive(Debug, Clone)]
pub struct EmergencyStopReason(pub String);

/// Per-execution safety watcher. One instance is spawned per running execution and ticks
/// at `config.check_interval` until dropped or told to stop.
pub struct SafetyMonitor {
    config: MonitorConfig,
    limits: SafetyLimits,
    violations: std::sync::Mutex<VecDeque<Violation>>,
    emergency_tx: mpsc::Sender<EmergencyStopReason>,
    last_network: std::sync::Mutex<Option<(u64, DateTime<Utc>)>>,
}

impl SafetyMonitor {
    pub fn new(config: MonitorConfig, limits: SafetyLimits) -> (Arc<Self>, mpsc::Receiver<EmergencyStopReason>) {
        let (emergency_tx, emergency_rx) = mpsc::channel(EMERGENCY_CHANNEL_CAPACITY);
        (
            Arc::new(Self {
                config,
                limits,
                violations: std::sync::Mutex::new(VecDeque::new()),
                emergency_tx,
                last_network: std::sync::Mutex::new(None),
            }),
            emergency_rx,
        )
    }

    /// Network throughput since the previous tick, in megabits per second. `None` on the
    /// first reading, since a rate needs two samples.
    fn network_mbps_since_last(&self, snapshot: &SystemMetrics) -> Option<f64> {
        let mut last = self.last_network.lock().unwrap();
        let rate = last.and_then(|(prev_bytes, prev_at)| {
            let elapsed = (snapshot.timestamp - prev_at).num_milliseconds();
            if elapsed <= 0 {
                return None;
            }
            let delta_bytes = snapshot.network_bytes_total.saturating_sub(prev_bytes);
            let mbits = delta_bytes as f64 * 8.0 / 1_000_000.0;
            Some(mbits / (elapsed as f64 / 1000.0))
        });
        *last = Some((snapshot.network_bytes_total, snapshot.timestamp));
        rate
    }

    /// Runs the tick loop until `cancel` fires. Intended to be spawned as its own task.
    pub async fn run(
        self: Arc<Self>,
        execution_id: crate::model::ExecutionId,
        probe: Arc<dyn SystemProbe>,
        bus: EventBus,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let snapshot = match probe.read().await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(%execution_id, error = %e, "probe read failed during safety check");
                            continue;
                        }
                    };
                    self.evaluate(execution_id, &snapshot, probe.as_ref(), &bus);
                }
            }
        }
    }

    fn evaluate(
        &self,
        execution_id: crate::model::ExecutionId,
        snapshot: &SystemMetrics,
        probe: &dyn SystemProbe,
        bus: &EventBus,
    ) {
        let checks = [
            (ViolationKind::Cpu, snapshot.cpu_percent, self.limits.max_cpu_percent),
            (ViolationKind::Memory, snapshot.memory_percent, self.limits.max_memory_percent),
            (ViolationKind::Disk, snapshot.disk_percent, self.limits.max_disk_percent),
        ];

        for (kind, value, limit) in checks {
            if value > limit {
                let severity = if value > self.config.emergency_threshold {
                    Severity::Critical
                } else if value >= self.config.alert_threshold {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                self.record(execution_id, kind, value, limit, severity, bus);

                if severity == Severity::Critical {
                    self.raise_emergency_stop(format!(
                        "critical safety violation: {:?} at {:.1} exceeds emergency threshold",
                        kind, value
                    ));
                }
            }
        }

        // Network violations are rate-limited information, never critical: a sustained
        // high-throughput workload is often intentional. Skipped on the first tick, since
        // a rate needs a previous sample to diff against.
        let network_mbps = self.network_mbps_since_last(snapshot).unwrap_or(0.0);
        if network_mbps > self.limits.max_network_mbps {
            let severity = if network_mbps >= self.config.alert_threshold {
                Severity::Error
            } else {
                Severity::Warning
            };
            self.record(
                execution_id,
                ViolationKind::Network,
                network_mbps,
                self.limits.max_network_mbps,
                severity,
                bus,
            );
        }

        if probe.is_thermal_authoritative() {
            if snapshot.temperature_celsius >= TEMP_CRITICAL_C {
                self.record(
                    execution_id,
                    ViolationKind::Temperature,
                    snapshot.temperature_celsius,
                    TEMP_CRITICAL_C,
                    Severity::Critical,
                    bus,
                );
                self.raise_emergency_stop(format!(
                    "critical safety violation: temperature at {:.1}C exceeds {:.1}C",
                    snapshot.temperature_celsius, TEMP_CRITICAL_C
                ));
            } else if snapshot.temperature_celsius >= TEMP_WARNING_C {
                self.record(
                    execution_id,
                    ViolationKind::Temperature,
                    snapshot.temperature_celsius,
                    TEMP_WARNING_C,
                    Severity::Warning,
                    bus,
                );
            }
        } else {
            debug!(%execution_id, "skipping temperature check: non-authoritative reading");
        }

        if self.config.auto_stop_enabled {
            let recent_error_or_critical = self.count_recent(Severity::Error);
            if recent_error_or_critical > self.config.max_violations_per_min {
                self.raise_emergency_stop(format!(
                    "too many violations: {} in last minute",
                    recent_error_or_critical
                ));
            }
        }
    }

    fn record(
        &self,
        execution_id: crate::model::ExecutionId,
        kind: ViolationKind,
        observed: f64,
        limit: f64,
        severity: Severity,
        bus: &EventBus,
    ) {
        let violation = Violation {
            kind,
            observed,
            limit,
            severity,
            message: format!("{:?} at {:.1} exceeds limit {:.1}", kind, observed, limit),
            timestamp: Utc::now(),
            critical: severity == Severity::Critical,
        };

        {
            let mut ring = self.violations.lock().unwrap();
            ring.push_back(violation.clone());
            self.prune_locked(&mut ring);
        }

        bus.publish(Event::SafetyViolation {
            violation: violation.clone(),
        });
        bus.publish(Event::SafetyAlert {
            alert: Alert::from(&violation),
        });
        crate::metrics::record_violation(
            &format!("{:?}", kind).to_lowercase(),
            &format!("{:?}", severity).to_lowercase(),
        );
        let _ = execution_id;
    }

    fn prune_locked(&self, ring: &mut VecDeque<Violation>) {
        let cutoff = Utc::now() - VIOLATION_RETENTION;
        while ring.front().map(|v| v.timestamp < cutoff).unwrap_or(false) {
            ring.pop_front();
        }
    }

    fn count_recent(&self, min_severity: Severity) -> usize {
        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        let ring = self.violations.lock().unwrap();
        ring.iter()
            .filter(|v| v.timestamp >= cutoff && v.severity >= min_severity)
            .count()
    }

    fn raise_emergency_stop(&self, reason: String) {
        match self.emergency_tx.try_send(EmergencyStopReason(reason.clone())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(reason, "emergency-stop channel full, dropping additional signal");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// True if any Error/Critical violation occurred within the last `cooldown_period`.
    ///
    /// Advisory only: the orchestrator does not currently consult this when starting new
    /// executions, mirroring the gap in the source system rather than inventing a policy.
    pub fn in_cooldown(&self) -> bool {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.cooldown_period).unwrap_or_default();
        let ring = self.violations.lock().unwrap();
        ring.iter()
            .any(|v| v.timestamp >= cutoff && v.severity >= Severity::Error)
    }

    /// Returns a snapshot of currently retained violations, oldest first.
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().unwrap().iter().cloned().collect()
    }
}

/// Scales intensity linearly from 0 to `target` over the first 10% of `total_duration`
/// (minimum 10s, capped at `total_duration`), in `steps` discrete steps. Returns `target`
/// once the ramp-up window has elapsed.
///
/// Plugins call this rather than implementing their own ramp curve, keeping the curve
/// consistent across workload kinds.
pub fn ramp_up_intensity(
    elapsed: Duration,
    target: u8,
    total_duration: Duration,
    steps: u32,
) -> u8 {
    let ramp_window = Duration::from_secs(10)
        .max(total_duration / 10)
        .min(total_duration);

    if elapsed >= ramp_window || ramp_window.is_zero() {
        return target;
    }

    let step_size = ramp_window.as_secs_f64() / steps.max(1) as f64;
    let current_step = (elapsed.as_secs_f64() / step_size).floor() as u32 + 1;
    let fraction = (current_step.min(steps) as f64) / steps.max(1) as f64;
    ((target as f64) * fraction).round() as u8
}

/// Time since an execution's nominal start, so callers don't need `tokio::time::Instant`.
pub fn elapsed_since(start: DateTime<Utc>) -> Duration {
    (Utc::now() - start).to_std().unwrap_or(Duration::ZERO)
}
