//! Batch block fetching with retries.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use bee_data::{ChainNode, FetchError, RawBlock};
use futures::{StreamExt, TryStreamExt};

use crate::task_pool::TaskPool;

/// Blocks fetched for the tasks claimed in one cycle.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    /// Claimed task ranges, ascending.
    pub tasks: Vec<RangeInclusive<u64>>,
    /// Every block of every claimed task, in height order.
    pub blocks: Vec<RawBlock>,
}

impl FetchedBatch {
    /// Blocks belonging to one claimed range.
    pub fn blocks_in<'a>(&'a self, range: &'a RangeInclusive<u64>) -> impl Iterator<Item = &'a RawBlock> {
        self.blocks.iter().filter(move |b| range.contains(&b.number))
    }
}

/// Claims pending tasks and fetches their blocks from the chain.
pub struct BlockFetcher<C> {
    chain: Arc<C>,
    concurrency: usize,
    attempts: u32,
    backoff: Duration,
}

impl<C: ChainNode> BlockFetcher<C> {
    /// Fetcher with 3 attempts per block and 500ms exponential backoff.
    pub fn new(chain: Arc<C>, concurrency: usize) -> Self {
        Self {
            chain,
            concurrency: concurrency.max(1),
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Claims up to `max_blocks` heights of pending tasks and fetches them.
    ///
    /// At most `concurrency` requests are in flight at once. Results keep
    /// height order.
    ///
    /// # Errors
    /// Returns `FetchError` if any block still fails after all attempts. The
    /// claimed tasks stay in flight so the timeout sweep can recover them.
    #[tracing::instrument(skip(self, pool))]
    pub async fn fetch_data(
        &self,
        pool: &mut TaskPool,
        max_blocks: u64,
    ) -> Result<FetchedBatch, FetchError> {
        let tasks = pool.claim(max_blocks);
        if tasks.is_empty() {
            return Ok(FetchedBatch::default());
        }

        let heights: Vec<u64> = tasks.iter().flat_map(|range| range.clone()).collect();
        tracing::debug!(
            tasks = tasks.len(),
            blocks = heights.len(),
            "fetching claimed tasks"
        );

        let blocks = futures::stream::iter(heights)
            .map(|height| self.fetch_with_retry(height))
            .buffered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(FetchedBatch { tasks, blocks })
    }

    /// Delay before retry number `attempt + 1`, doubling from the base.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2_u32.saturating_pow(attempt))
    }

    async fn fetch_with_retry(&self, height: u64) -> Result<RawBlock, FetchError> {
        let mut attempt = 0;
        loop {
            match self.chain.get_block(height).await {
                Ok(block) => return Ok(block),
                Err(e) if attempt + 1 < self.attempts => {
                    let backoff = self.backoff_for(attempt);
                    tracing::debug!(
                        block_number = height,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying failed block fetch"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        block_number = height,
                        attempts = self.attempts,
                        error = %e,
                        "failed to fetch block"
                    );
                    return Err(e);
                }
            }
        }
    }
}
