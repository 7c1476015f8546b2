//! Engine configuration

use types::errors::EngineError;

/// Tunables for the matching dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Degree of cross-symbol parallelism (worker threads).
    pub worker_count: usize,
    /// Per-symbol mailbox bound; admission while full fails with overloaded.
    pub max_queue_size: usize,
    /// Resting orders older than this are swept; 0 disables the sweep.
    pub order_timeout_secs: u64,
    /// Reject stop-loss submissions when false.
    pub enable_stop_loss: bool,
    /// Per-submit bound on chained stop-loss triggers.
    pub max_trigger_depth: u32,
    /// Gate top-of-book fan-out.
    pub enable_market_data: bool,
    /// Create books on first reference; otherwise unknown symbols reject.
    pub auto_create_symbols: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 10_000,
            order_timeout_secs: 86_400,
            enable_stop_loss: true,
            max_trigger_depth: 64,
            enable_market_data: true,
            auto_create_symbols: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.worker_count == 0 {
            return Err(EngineError::Validation(
                "worker_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
