// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Concrete workload plugins for the stress engine: CPU, memory, and I/O.

pub mod cpu;
pub mod io;
pub mod memory;

pub use cpu::CpuStressPlugin;
pub use io::IoStressPlugin;
pub use memory::MemoryStressPlugin;

use std::sync::Arc;
use stress_core::{PluginDescriptor, PluginRegistry};

/// Registers all three concrete workload plugins under their canonical names
/// (`cpu-stress`, `memory-stress`, `io-stress`).
pub fn register_all(registry: &PluginRegistry) {
    registry.register(PluginDescriptor {
        name: "cpu-stress".to_string(),
        version: "1.0.0".to_string(),
        description: "CPU saturation workload".to_string(),
        factory: Box::new(|| Arc::new(CpuStressPlugin::new())),
    });
    registry.register(PluginDescriptor {
        name: "memory-stress".to_string(),
        version: "1.0.0".to_string(),
        description: "Memory allocation and access workload".to_string(),
        factory: Box::new(|| Arc::new(MemoryStressPlugin::new())),
    });
    registry.register(PluginDescriptor {
        name: "io-stress".to_string(),
        version: "1.0.0".to_string(),
        description: "Disk read/write workload".to_string(),
        factory: Box::new(|| Arc::new(IoStressPlugin::new())),
    });
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_registers_three_plugins() {
        let registry = PluginRegistry::new();
        register_all(&registry);
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["cpu-stress", "io-stress", "memory-stress"]);
    }
}
