//! Collaborators a compilation draws on.

use std::sync::Arc;

use rayon::ThreadPool;
use view_core::position::{PositionSource, SecuritySource};
use view_depgraph::{FunctionRepository, MarketDataAvailabilityProvider};

use crate::config::CompilerConfig;
use crate::metrics::CompilationMetrics;

/// Shared, read-only inputs of every compile call.
///
/// Cloning is cheap; all collaborators are reference counted. The function
/// repository and market data oracle are shared read-only by every
/// configuration, so one `ViewCompilationServices` may serve concurrent
/// compilations.
#[derive(Clone)]
pub struct ViewCompilationServices {
    /// Market data availability oracle.
    pub market_data: Arc<dyn MarketDataAvailabilityProvider>,
    /// Registered functions.
    pub functions: Arc<FunctionRepository>,
    /// Portfolio lookup.
    pub positions: Arc<dyn PositionSource>,
    /// Security lookup.
    pub securities: Arc<dyn SecuritySource>,
    /// Pool for traversal, security resolution and graph building.
    pub executor: Arc<ThreadPool>,
    /// Compiler settings.
    pub config: CompilerConfig,
    /// Counters fed by every compile call made with these services.
    pub metrics: Arc<CompilationMetrics>,
}

impl ViewCompilationServices {
    /// Bundles the collaborators with the default configuration.
    pub fn new(
        market_data: Arc<dyn MarketDataAvailabilityProvider>,
        functions: Arc<FunctionRepository>,
        positions: Arc<dyn PositionSource>,
        securities: Arc<dyn SecuritySource>,
        executor: Arc<ThreadPool>,
    ) -> Self {
        Self {
            market_data,
            functions,
            positions,
            securities,
            executor,
            config: CompilerConfig::default(),
            metrics: Arc::new(CompilationMetrics::new()),
        }
    }

    /// Replaces the compiler configuration (builder style).
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Identifier of the function registry snapshot in use.
    pub fn function_init_id(&self) -> u64 {
        self.functions.function_init_id()
    }
}
