//! CPU backends for the differential harness.
//!
//! This crate re-exports the built-in CPU reference backend from `bops-core`
//! and adds an independently written tiled backend to compare against it.

pub mod tiled;

pub use bops_core::cpu_kernels::CpuRefBackend;
pub use tiled::TiledCpuBackend;

use bops_core::BackendRegistry;

/// Registry of every backend shipped with the workspace, reference first.
pub fn default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register("CPU", || Ok(Box::new(CpuRefBackend)));
    registry.register("CPU-tiled", || Ok(Box::new(TiledCpuBackend)));
    registry
}
