// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Memory workload: allocates a configurable footprint and hammers it with random accesses.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stress_core::error::{EngineError, Result};
use stress_core::model::{SafetyLimits, TestParams};
use stress_core::safety::ramp_up_intensity;
use stress_core::WorkloadPlugin;
use tokio_util::sync::CancellationToken;

const BLOCK_SIZE: usize = 4 * 1024;
const ACCESS_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    Sequential,
    Random,
    Fragmented,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::Sequential
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Read,
    Write,
    Readwrite,
}

impl Default for AccessType {
    fn default() -> Self {
        Self::Readwrite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_alloc_size")]
    pub alloc_size: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub pattern: Pattern,
    #[serde(default)]
    pub access_type: AccessType,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_access_delay")]
    pub access_delay: u64,
}

fn default_alloc_size() -> u64 {
    1 << 30
}
fn default_chunk_size() -> u64 {
    64 * 1024 * 1024
}
fn default_workers() -> usize {
    4
}
fn default_access_delay() -> u64 {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            alloc_size: default_alloc_size(),
            chunk_size: default_chunk_size(),
            pattern: Pattern::default(),
            access_type: AccessType::default(),
            workers: default_workers(),
            access_delay: default_access_delay(),
        }
    }
}

fn init_chunk(chunk_index: usize, size: usize, pattern: Pattern) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    match pattern {
        Pattern::Sequential => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (i % 256) as u8;
            }
        }
        Pattern::Random => {
            rand::thread_rng().fill(&mut buf[..]);
        }
        Pattern::Fragmented => {
            let mut rng = rand::thread_rng();
            for (k, block) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
                if (k + chunk_index) % 2 == 0 {
                    rng.fill(block);
                }
            }
        }
    }
    buf
}

/// Memory allocator/accessor. `initialize` reserves and initialises the chunks (the
/// workload's "scratch state"); `execute` only runs the access phase against them.
pub struct MemoryStressPlugin {
    config: Mutex<MemoryConfig>,
    chunks: Arc<RwLock<Option<Vec<Vec<u8>>>>>,
    allocated_bytes: AtomicU64,
    access_count: Arc<AtomicU64>,
    last_latency_ns: Arc<AtomicU64>,
}

impl MemoryStressPlugin {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(MemoryConfig::default()),
            chunks: Arc::new(RwLock::new(None)),
            allocated_bytes: AtomicU64::new(0),
            access_count: Arc::new(AtomicU64::new(0)),
            last_latency_ns: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for MemoryStressPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadPlugin for MemoryStressPlugin {
    fn name(&self) -> &str {
        "memory-stress"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Allocates a configurable memory footprint and stresses it with random accesses."
    }

    fn config_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "alloc_size": {"type": "integer", "minimum": 1},
                "chunk_size": {"type": "integer", "minimum": 1},
                "pattern": {"enum": ["sequential", "random", "fragmented"]},
                "access_type": {"enum": ["read", "write", "readwrite"]},
                "workers": {"type": "integer", "minimum": 1},
                "access_delay": {"type": "integer", "minimum": 0}
            }
        })
    }

    async fn initialize(&self, plugin_config: serde_json::Value) -> Result<()> {
        let config: MemoryConfig = if plugin_config.is_null() {
            MemoryConfig::default()
        } else {
            serde_json::from_value(plugin_config)?
        };
        if config.chunk_size == 0 || config.workers == 0 {
            return Err(EngineError::invalid_config(
                "chunk_size and workers must be >= 1",
            ));
        }

        let chunk_count = config.alloc_size.div_ceil(config.chunk_size) as usize;
        let chunk_size = config.chunk_size as usize;
        let pattern = config.pattern;
        let chunks: Vec<Vec<u8>> = tokio::task::spawn_blocking(move || {
            (0..chunk_count)
                .map(|i| init_chunk(i, chunk_size, pattern))
                .collect()
        })
        .await
        .map_err(|e| EngineError::plugin_fault("memory-stress", e.to_string()))?;

        let allocated: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        self.allocated_bytes.store(allocated, Ordering::SeqCst);
        self.access_count.store(0, Ordering::SeqCst);
        *self.chunks.write() = Some(chunks);
        *self.config.lock() = config;
        Ok(())
    }

    async fn execute(&self, params: TestParams, cancel: CancellationToken) -> Result<()> {
        let config = self.config.lock().clone();
        let access_type = config.access_type;
        let base_delay = std::time::Duration::from_millis(config.access_delay);
        let intensity = params.intensity;
        let ramp_up = params.ramp_up;
        let start = std::time::Instant::now();

        let mut tasks = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let cancel = cancel.clone();
            let access_count = Arc::clone(&self.access_count);
            let last_latency_ns = Arc::clone(&self.last_latency_ns);
            let duration = params.duration;
            let chunks_ref = Arc::clone(&self.chunks);

            tasks.push(tokio::spawn(async move {
                let mut rng = rand::thread_rng();
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
                        let guard = chunks_ref.read();
                        if let Some(chunks) = guard.as_ref() {
                            if !chunks.is_empty() {
                                let chunk_idx = rng.gen_range(0..chunks.len());
                                let chunk = &chunks[chunk_idx];
                                if chunk.len() > ACCESS_WINDOW {
                                    let offset = rng.gen_range(0..chunk.len() - ACCESS_WINDOW);
                                    let access_started = std::time::Instant::now();
                                    let do_read = matches!(access_type, AccessType::Read)
                                        || (matches!(access_type, AccessType::Readwrite)
                                            && rng.gen_bool(0.5));
                                    if do_read {
                                        let mut sum: u64 = 0;
                                        for b in &chunk[offset..offset + ACCESS_WINDOW] {
                                            sum = sum.wrapping_add(*b as u64);
                                        }
                                        std::hint::black_box(sum);
                                    }
                                    // Writes require a write lock; reacquire briefly rather
                                    // than holding it for the whole access.
                                    drop(guard);
                                    if !do_read {
                                        let byte: u8 = rng.gen();
                                        let mut guard = chunks_ref.write();
                                        if let Some(chunks) = guard.as_mut() {
                                            if let Some(chunk) = chunks.get_mut(chunk_idx) {
                                                for b in &mut chunk[offset..offset + ACCESS_WINDOW]
                                                {
                                                    *b = byte;
                                                }
                                            }
                                        }
                                    }
                                    last_latency_ns.store(
                                        access_started.elapsed().as_nanos() as u64,
                                        Ordering::Relaxed,
                                    );
                                    access_count.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    }

                    let idle = base_delay + Duration::from_millis((100 - current) as u64 * 2);
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
        *self.chunks.write() = None;
        Ok(())
    }

    fn current_metrics(&self) -> HashMap<String, f64> {
        let mut fields = HashMap::new();
        fields.insert(
            "allocated_mb".to_string(),
            self.allocated_bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
        );
        fields.insert(
            "access_count".to_string(),
            self.access_count.load(Ordering::Relaxed) as f64,
        );
        fields.insert(
            "last_access_latency_ns".to_string(),
            self.last_latency_ns.load(Ordering::Relaxed) as f64,
        );
        fields
    }

    fn declared_safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_cpu_percent: 30.0,
            max_memory_percent: 85.0,
            max_disk_percent: 50.0,
            max_network_mbps: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_pattern_fills_with_index_mod_256() {
        let chunk = init_chunk(0, 300, Pattern::Sequential);
        assert_eq!(chunk[0], 0);
        assert_eq!(chunk[255], 255);
        assert_eq!(chunk[256], 0);
    }

    #[test]
    fn test_fragmented_pattern_leaves_odd_blocks_untouched() {
        let chunk = init_chunk(0, BLOCK_SIZE * 2, Pattern::Fragmented);
        // chunk_index 0, block 0: (0+0) even -> randomised, we can't assert content but
        // block 1: (1+0) odd -> must remain zeroed.
        assert!(chunk[BLOCK_SIZE..BLOCK_SIZE * 2].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_allocate_and_release() {
        let plugin = MemoryStressPlugin::new();
        plugin
            .initialize(serde_json::json!({
                "alloc_size": 128 * 1024 * 1024u64,
                "chunk_size": 32 * 1024 * 1024u64,
                "pattern": "sequential",
                "access_type": "read",
                "workers": 2,
                "access_delay": 1
            }))
            .await
            .unwrap();

        let metrics_before = plugin.current_metrics();
        assert!((metrics_before["allocated_mb"] - 128.0).abs() < 0.1);

        let params = TestParams {
            duration: std::time::Duration::from_millis(200),
            intensity: 50,
            concurrency: 2,
            ramp_up: false,
            custom: HashMap::new(),
        };
        plugin
            .execute(params, CancellationToken::new())
            .await
            .unwrap();

        let metrics_after = plugin.current_metrics();
        assert!(metrics_after["access_count"] > 0.0);

        plugin.cleanup().await.unwrap();
        assert!(plugin.chunks.read().is_none());
        // allocated_mb is cached independently of buffer lifetime: Cleanup frees the
        // buffers but the last-observed metric snapshot remains readable.
        let metrics_post_cleanup = plugin.current_metrics();
        assert!((metrics_post_cleanup["allocated_mb"] - 128.0).abs() < 0.1);
    }
}
