use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::constants::normalizer::DEFAULT_CACHE_CAPACITY;

/// Top-level pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Number of worker threads; defaults to the logical core count.
    pub workers: usize,
    /// Number of upserts between checkpoint commits (also the progress cadence).
    pub batch_size: usize,
    /// Optional cap on new records, applied after skipping completed ones.
    pub limit: Option<usize>,
    /// Re-run rows whose previous outcome was an error.
    pub retry_errors: bool,
    /// Checkpoint store path; falls back to the temp directory when unwritable.
    pub checkpoint_path: PathBuf,
    /// Use the model-backed normalizer when a credential is available.
    pub model_backed_normalization: bool,
    /// Minimum spacing between LLM submissions, spread across workers.
    pub llm_min_interval: Duration,
    /// Client-level timeout for LLM adapter calls.
    pub llm_timeout: Duration,
    /// Per-worker normalization cache capacity.
    pub normalize_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: 100,
            limit: None,
            retry_errors: false,
            checkpoint_path: PathBuf::from(crate::constants::checkpoint::DEFAULT_STORE_FILENAME),
            model_backed_normalization: true,
            llm_min_interval: Duration::ZERO,
            llm_timeout: Duration::from_secs(crate::constants::llm::DEFAULT_TIMEOUT_SECS),
            normalize_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Worker count with zero coerced to the logical core count.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            default_workers()
        } else {
            self.workers
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}
