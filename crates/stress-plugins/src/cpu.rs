// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! CPU workload: saturates worker threads with one of a handful of pure-compute kernels.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stress_core::error::{EngineError, Result};
use stress_core::model::{SafetyLimits, TestParams};
use stress_core::safety::ramp_up_intensity;
use stress_core::WorkloadPlugin;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Prime,
    Fibonacci,
    Matrix,
    Pi,
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::Prime
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_intensity")]
    pub intensity: u8,
    #[serde(default = "default_ramp_up")]
    pub ramp_up: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_intensity() -> u8 {
    70
}

fn default_ramp_up() -> bool {
    true
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            algorithm: Algorithm::default(),
            intensity: default_intensity(),
            ramp_up: default_ramp_up(),
        }
    }
}

/// One unit of compute for the selected algorithm. Run inside `spawn_blocking`: these are
/// pure CPU kernels with no await points, so they must not run on the async executor.
fn run_unit(algorithm: Algorithm) {
    match algorithm {
        Algorithm::Prime => {
            let mut count = 0u32;
            'outer: for n in 2u32..10_000 {
                let limit = (n as f64).sqrt() as u32 + 1;
                for d in 2..limit {
                    if n % d == 0 {
                        continue 'outer;
                    }
                }
                count += 1;
            }
            std::hint::black_box(count);
        }
        Algorithm::Fibonacci => {
            std::hint::black_box(fibonacci(35));
        }
        Algorithm::Matrix => {
            const N: usize = 100;
            let a = vec![1.0f64; N * N];
            let b = vec![2.0f64; N * N];
            let mut c = vec![0.0f64; N * N];
            for i in 0..N {
                for k in 0..N {
                    let a_ik = a[i * N + k];
                    for j in 0..N {
                        c[i * N + j] += a_ik * b[k * N + j];
                    }
                }
            }
            std::hint::black_box(&c);
        }
        Algorithm::Pi => {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let mut inside = 0u64;
            for _ in 0..1_000_000 {
                let x: f64 = rng.gen_range(-1.0..1.0);
                let y: f64 = rng.gen_range(-1.0..1.0);
                if x * x + y * y <= 1.0 {
                    inside += 1;
                }
            }
            std::hint::black_box(4.0 * inside as f64 / 1_000_000.0);
        }
    }
}

fn fibonacci(n: u32) -> u64 {
    if n < 2 {
        n as u64
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

/// Compute-bound stressor. Spawns `workers` tasks, each repeatedly running one unit of the
/// configured algorithm, throttled to approximate the requested intensity.
pub struct CpuStressPlugin {
    config: Mutex<CpuConfig>,
    total_ops: Arc<AtomicU64>,
    run_started: Mutex<Option<Instant>>,
}

impl CpuStressPlugin {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(CpuConfig::default()),
            total_ops: Arc::new(AtomicU64::new(0)),
            run_started: Mutex::new(None),
        }
    }
}

impl Default for CpuStressPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadPlugin for CpuStressPlugin {
    fn name(&self) -> &str {
        "cpu-stress"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Saturates CPU worker threads with prime, fibonacci, matrix, or pi compute kernels."
    }

    fn config_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workers": {"type": "integer", "minimum": 1},
                "algorithm": {"enum": ["prime", "fibonacci", "matrix", "pi"]},
                "intensity": {"type": "integer", "minimum": 1, "maximum": 100},
                "ramp_up": {"type": "boolean"}
            }
        })
    }

    async fn initialize(&self, plugin_config: serde_json::Value) -> Result<()> {
        let config: CpuConfig = if plugin_config.is_null() {
            CpuConfig::default()
        } else {
            serde_json::from_value(plugin_config)?
        };
        if config.workers == 0 {
            return Err(EngineError::invalid_config("workers must be >= 1"));
        }
        self.total_ops.store(0, Ordering::SeqCst);
        *self.config.lock() = config;
        Ok(())
    }

    async fn execute(&self, params: TestParams, cancel: CancellationToken) -> Result<()> {
        let config = self.config.lock().clone();
        // `params.intensity` is honored as given, including 0 — a caller asking for zero
        // intensity still wants workers alive and observing cancellation, just doing no
        // compute work, per the documented intensity=0 boundary behavior.
        let intensity = params.intensity;
        let ramp_up = params.ramp_up && config.ramp_up;
        let start = Instant::now();
        *self.run_started.lock() = Some(start);

        let mut tasks = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let cancel = cancel.clone();
            let total_ops = Arc::clone(&self.total_ops);
            let duration = params.duration;
            let algorithm = config.algorithm;
            tasks.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() || start.elapsed() >= duration {
                        break;
                    }

                    let current = if ramp_up {
                        ramp_up_intensity(start.elapsed(), intensity, duration, 10)
                    } else {
                        intensity
                    };

                    if current > 0 {
                        tokio::task::spawn_blocking(move || run_unit(algorithm))
                            .await
                            .ok();
                        total_ops.fetch_add(1, Ordering::Relaxed);
                    }

                    let idle = Duration::from_millis((100 - current) as u64 * 2);
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn current_metrics(&self) -> HashMap<String, f64> {
        let mut fields = HashMap::new();
        let total_ops = self.total_ops.load(Ordering::Relaxed) as f64;
        fields.insert("total_operations".to_string(), total_ops);
        fields.insert("worker_count".to_string(), self.config.lock().workers as f64);

        let ops_per_sec = match *self.run_started.lock() {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    total_ops / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        fields.insert("operations_per_sec".to_string(), ops_per_sec);
        fields
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
