//! The agent-facing request bridge: newline-delimited JSON dispatch over a
//! worker pool, per-session role enforcement, progress streaming, and the
//! full method surface of the modeling core.

pub mod dispatch;
pub mod handlers;
pub mod messages;
pub mod serve;
pub mod session;

use std::sync::Arc;

use anvil_types::{CoreConfig, CoreResult};
use geom_kernel::{Kernel, NativeKernel};
use model_store::ModelStore;

pub use dispatch::dispatch_request;
pub use messages::{RequestFrame, ResponseFrame};
pub use serve::serve;
pub use session::Session;

/// Process-wide core state: the store, the kernel and solver tuning.
/// Built once at startup from an immutable `CoreConfig`.
pub struct Core {
    pub store: ModelStore,
    pub kernel: Arc<dyn Kernel>,
    pub solve_options: constraint_solver::SolveOptions,
}

impl Core {
    pub fn new(config: CoreConfig) -> CoreResult<Self> {
        let kernel = Arc::new(NativeKernel::new(config.angular_segments));
        let store = ModelStore::open(config)?;
        Ok(Self {
            store,
            kernel,
            solve_options: constraint_solver::SolveOptions::default(),
        })
    }

    /// In-memory core for tests.
    pub fn ephemeral() -> Self {
        Self::new(CoreConfig::ephemeral()).expect("in-memory core cannot fail to open")
    }
}
