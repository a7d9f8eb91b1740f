// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Host resource probing: the interface by which the engine observes system state.

use crate::error::Result;
use crate::model::SystemMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Disks, Networks, System};

/// Reads current CPU/memory/disk/network/temperature state from the host.
///
/// Implementations are host-specific; tests substitute a deterministic fake.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Returns the current system-wide reading. The first call on a fresh probe may return
    /// a CPU reading of 0 while it records a baseline for delta computation.
    async fn read(&self) -> Result<SystemMetrics>;

    /// Whether the most recent temperature reading came from a real sensor.
    fn is_thermal_authoritative(&self) -> bool;
}

/// `sysinfo`-backed probe for the real host.
pub struct HostProbe {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    thermal_authoritative: std::sync::atomic::AtomicBool,
}

impl HostProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system: Mutex::new(system),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            thermal_authoritative: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn read(&self) -> Result<SystemMetrics> {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        system.refresh_memory();
        let cpu_percent = system.global_cpu_usage() as f64;

        let total_mem = system.total_memory();
        let available_mem = system.available_memory();
        let memory_percent = if total_mem > 0 {
            ((total_mem - available_mem) as f64 / total_mem as f64) * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.iter().next())
            .map(|d| {
                let total = d.total_space();
                let avail = d.available_space();
                if total == 0 {
                    0.0
                } else {
                    ((total - avail) as f64 / total as f64) * 100.0
                }
            })
            .unwrap_or(0.0);

        let mut networks = self.networks.lock();
        networks.refresh(true);
        let network_bytes_total: u64 = networks
            .iter()
            .filter(|(name, _)| !name.starts_with("lo"))
            .map(|(_, data)| data.total_received() + data.total_transmitted())
            .sum();

        // Temperature sensors are not uniformly available across hosts and `sysinfo`'s
        // component API varies by platform; until a reliable cross-platform source is
        // wired in, report the documented safe default and mark it non-authoritative.
        let temperature_celsius = 35.0;
        self.thermal_authoritative
            .store(false, std::sync::atomic::Ordering::Relaxed);

        Ok(SystemMetrics {
            timestamp: chrono::Utc::now(),
            cpu_percent,
            memory_percent,
            disk_percent,
            network_bytes_total,
            temperature_celsius,
            thermal_authoritative: false,
        })
    }

    fn is_thermal_authoritative(&self) -> bool {
        self.thermal_authoritative
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Deterministic test double. Tests set the snapshot that `read` returns.
pub struct FakeProbe {
    snapshot: Arc<Mutex<SystemMetrics>>,
    thermal_authoritative: std::sync::atomic::AtomicBool,
    fail_next: std::sync::atomic::AtomicBool,
}

impl FakeProbe {
    pub fn new(snapshot: SystemMetrics) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(snapshot)),
            thermal_authoritative: std::sync::atomic::AtomicBool::new(
                snapshot.thermal_authoritative,
            ),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set(&self, snapshot: SystemMetrics) {
        self.thermal_authoritative.store(
            snapshot.thermal_authoritative,
            std::sync::atomic::Ordering::Relaxed,
        );
        *self.snapshot.lock() = snapshot;
    }

    /// Makes the next `read()` call return `ProbeFailure`.
    pub fn fail_next_read(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

#[async_trait]
impl SystemProbe for FakeProbe {
    async fn read(&self) -> Result<SystemMetrics> {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::Relaxed)
        {
            return Err(crate::error::EngineError::ProbeFailure(
                "simulated probe failure".into(),
            ));
        }
        Ok(*self.snapshot.lock())
    }

    fn is_thermal_authoritative(&self) -> bool {
        self.thermal_authoritative
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_probe_returns_configured_snapshot() {
        let mut snapshot = SystemMetrics::zero();
        snapshot.cpu_percent = 97.0;
        let probe = FakeProbe::new(snapshot);

        let read = probe.read().await.unwrap();
        assert_eq!(read.cpu_percent, 97.0);
    }

    #[tokio::test]
    async fn test_fake_probe_failure_is_recoverable() {
        let probe = FakeProbe::new(SystemMetrics::zero());
        probe.fail_next_read();
        assert!(probe.read().await.is_err());
        // Probe is not poisoned: the next call succeeds.
        assert!(probe.read().await.is_ok());
    }
}
