//! bee-crawler: the crawl-and-reconcile engine.
//!
//! A single [`Crawler`] owns a [`TaskPool`] and drives the polling cycle:
//! read the chain head, claim the next block range, fetch and decode it,
//! check recent ranges for forks, and advance the durable cursor over
//! ranges that are finished and past the fork window.

pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod processor;
pub mod task_pool;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::CrawlConfig;
pub use crawler::{Crawler, CycleReport};
pub use error::TaskPoolError;
pub use fetcher::{BlockFetcher, FetchedBatch};
pub use processor::BlockProcessor;
pub use task_pool::{BlockTask, TaskCountReport, TaskPool, TaskStatus};
