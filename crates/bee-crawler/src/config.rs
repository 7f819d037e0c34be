//! Crawl loop settings.

use std::time::Duration;

use eyre::{ensure, Result};

/// Settings for one crawler instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlConfig {
    /// Height to start from when no cursor has been persisted yet.
    pub start_height: u64,
    /// Blocks claimed per cycle.
    pub batch_unit: u64,
    /// Idle sleep when the crawler has caught up with the chain head.
    pub poll_interval: Duration,
    /// Trailing blocks below the head in which re-orgs are still expected.
    pub fork_window: u64,
    /// How long a task may stay in flight before it is expired.
    pub task_timeout: Duration,
    /// Concurrent block requests within one batch.
    pub fetch_concurrency: usize,
    /// Attempts per block before the batch fails.
    pub fetch_attempts: u32,
    /// Base of the exponential backoff between attempts.
    pub fetch_backoff: Duration,
    /// Write decoded records to the sink. The cursor is always persisted.
    pub persist: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            batch_unit: 10,
            poll_interval: Duration::from_secs(5),
            fork_window: 12,
            task_timeout: Duration::from_secs(60),
            fetch_concurrency: 10,
            fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(500),
            persist: true,
        }
    }
}

impl CrawlConfig {
    /// # Errors
    /// Returns error if a setting would stall the loop.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_unit > 0, "batch unit must be at least 1 block");
        ensure!(self.fetch_concurrency > 0, "fetch concurrency must be at least 1");
        ensure!(self.fetch_attempts > 0, "fetch attempts must be at least 1");
        ensure!(!self.task_timeout.is_zero(), "task timeout must be positive");
        Ok(())
    }
}
