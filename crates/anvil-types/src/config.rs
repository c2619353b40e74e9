use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, established once at startup and never
/// mutated thereafter. All tunables live here rather than in globals.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory for persisted state. `None` keeps everything in
    /// memory (tests, throwaway sessions).
    pub data_dir: Option<PathBuf>,
    /// Worker threads draining the request queue.
    pub worker_threads: usize,
    /// Capacity of the bounded request queue.
    pub queue_depth: usize,
    /// Wall-clock budget per handler invocation.
    pub handler_budget: Duration,
    /// Soft cap on entities per workspace; `create` is rejected beyond it.
    pub entity_cap: usize,
    /// Segments used to discretise a full circle in the kernel.
    pub angular_segments: usize,
    /// Tessellation linear deflection for export, in millimetres.
    pub linear_deflection: f64,
    /// Tessellation angular deflection for export, in radians.
    pub angular_deflection: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            worker_threads: 4,
            queue_depth: 256,
            handler_budget: Duration::from_secs(600),
            entity_cap: 10_000,
            angular_segments: 512,
            linear_deflection: 0.1,
            angular_deflection: 0.3,
        }
    }
}

impl CoreConfig {
    /// In-memory configuration for tests.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }
}
