//! The polling crawl loop.
//!
//! One cycle reads the chain head, prepares the next range (or sleeps when
//! caught up), fetches and processes claimed tasks, reconciles recent ranges
//! against the chain, then sweeps timeouts, retries failures and advances the
//! cursor. Cycles repeat until the cancellation token fires.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use alloy::primitives::B256;
use bee_abi::MethodRegistry;
use bee_data::{BlockSink, ChainNode, CursorStore, RawBlock};
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CrawlConfig;
use crate::fetcher::{BlockFetcher, FetchedBatch};
use crate::processor::BlockProcessor;
use crate::task_pool::TaskPool;

/// What one cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub chain_height: u64,
    /// Range added to the pool this cycle.
    pub prepared: Option<RangeInclusive<u64>>,
    pub certain: bool,
    pub fetched_blocks: usize,
    pub processed_blocks: usize,
    pub failed_tasks: usize,
    /// Lowest height invalidated by a fork.
    pub fork_at: Option<u64>,
    pub expired: usize,
    pub retried: usize,
    /// New cursor, if it moved.
    pub cursor: Option<u64>,
    pub cancelled: bool,
}

pub struct Crawler<C, S> {
    chain: Arc<C>,
    store: S,
    pool: TaskPool,
    fetcher: BlockFetcher<C>,
    processor: BlockProcessor,
    config: CrawlConfig,
    start_height: u64,
}

impl<C, S> Crawler<C, S>
where
    C: ChainNode,
    S: BlockSink + CursorStore,
{
    /// Creates a crawler resuming from the persisted cursor, or from the
    /// configured start height on first run.
    ///
    /// # Errors
    /// Returns error if the config is invalid or the cursor cannot be read.
    pub fn new(
        chain: Arc<C>,
        store: S,
        registry: Arc<MethodRegistry>,
        config: CrawlConfig,
    ) -> Result<Self> {
        config.validate()?;
        let start_height = store
            .load_start_height()
            .wrap_err("failed to load crawler cursor")?
            .map_or(config.start_height, |persisted| {
                persisted.max(config.start_height)
            });

        let pool = TaskPool::new(start_height, config.fork_window, config.task_timeout);
        let fetcher = BlockFetcher::new(Arc::clone(&chain), config.fetch_concurrency)
            .with_retry(config.fetch_attempts, config.fetch_backoff);
        let processor = BlockProcessor::new(registry, config.persist);

        Ok(Self {
            chain,
            store,
            pool,
            fetcher,
            processor,
            config,
            start_height,
        })
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs cycles until `cancel` fires.
    ///
    /// # Errors
    /// Returns error if the chain head cannot be read, the sink fails on a
    /// rollback or cursor write, or task bookkeeping is violated.
    #[tracing::instrument(skip_all, fields(start_height = self.start_height))]
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        self.processor.save_contracts(&self.store)?;
        info!(
            batch_unit = self.config.batch_unit,
            fork_window = self.config.fork_window,
            persist = self.config.persist,
            "crawler started"
        );

        while !cancel.is_cancelled() {
            let report = self.run_cycle(&cancel).await?;
            if report.cancelled {
                break;
            }
        }

        info!(cursor = self.pool.cursor(), "crawler stopped");
        Ok(())
    }

    /// Runs one poll, prepare, fetch, reconcile and sweep cycle.
    ///
    /// # Errors
    /// See [`Crawler::run`].
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let chain_height = tokio::select! {
            _ = cancel.cancelled() => None,
            height = self.chain.get_current_height() => Some(height),
        };
        let Some(chain_height) = chain_height else {
            report.cancelled = true;
            return Ok(report);
        };
        let chain_height = chain_height.wrap_err("failed to read chain height")?;
        report.chain_height = chain_height;

        if !self.prepare(chain_height, &mut report)? {
            debug!(chain_height, "caught up with chain, sleeping");
            let slept = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(self.config.poll_interval) => true,
            };
            if !slept {
                report.cancelled = true;
                return Ok(report);
            }
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => None,
            batch = self.fetcher.fetch_data(&mut self.pool, self.config.batch_unit) => Some(batch),
        };
        let Some(fetched) = fetched else {
            let failed = self.pool.fail_in_flight();
            debug!(failed, "fetch abandoned on shutdown");
            report.cancelled = true;
            return Ok(report);
        };
        match fetched {
            Ok(batch) => {
                report.fetched_blocks = batch.blocks.len();
                self.process_batch(&batch, chain_height, &mut report)?;
            }
            Err(e) => {
                warn!(error = %e, "block fetch failed, claimed tasks wait for timeout");
            }
        }

        if !report.certain || self.pool.has_uncertain_completed() {
            let reconciled = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.reconcile(chain_height, &mut report) => Some(result),
            };
            let Some(reconciled) = reconciled else {
                debug!("fork check abandoned on shutdown");
                report.cancelled = true;
                return Ok(report);
            };
            reconciled?;
        }

        self.pool.check_task_count(self.start_height, chain_height);
        report.expired = self.pool.check_time_out();
        report.retried = self.pool.process_errors();
        if let Some(cursor) = self.pool.advance_cursor() {
            self.store
                .advance_height(cursor)
                .wrap_err("failed to persist crawler cursor")?;
            report.cursor = Some(cursor);
        }

        info!(
            chain_height,
            cursor = self.pool.cursor(),
            pool_height = self.pool.task_pool_height(),
            tasks = self.pool.len(),
            processed = report.processed_blocks,
            "crawl cycle finished"
        );
        Ok(report)
    }

    /// Adds the next range when no retries are waiting. Returns false when
    /// there is nothing new to prepare.
    fn prepare(&mut self, chain_height: u64, report: &mut CycleReport) -> Result<bool> {
        if self.pool.has_pending() {
            debug!("retrying pending tasks before preparing new ranges");
            return Ok(true);
        }

        let from = self.pool.task_pool_height().max(self.start_height);
        if from > chain_height {
            return Ok(false);
        }
        let to = chain_height.min(from + self.config.batch_unit - 1);
        let certain = self.pool.is_certain(to, chain_height);
        self.pool.prepare_task(from, to, certain)?;

        report.prepared = Some(from..=to);
        report.certain = certain;
        Ok(true)
    }

    fn process_batch(
        &mut self,
        batch: &FetchedBatch,
        chain_height: u64,
        report: &mut CycleReport,
    ) -> Result<()> {
        for range in &batch.tasks {
            let blocks: Vec<&RawBlock> = batch.blocks_in(range).collect();
            match self.process_task(range, &blocks, chain_height) {
                Ok(hashes) => {
                    report.processed_blocks += blocks.len();
                    self.pool.complete(*range.start(), hashes)?;
                }
                Err(e) => {
                    warn!(
                        from = range.start(),
                        to = range.end(),
                        error = %e,
                        "task processing failed"
                    );
                    report.failed_tasks += 1;
                    self.pool.fail(*range.start())?;
                }
            }
        }
        Ok(())
    }

    fn process_task(
        &self,
        range: &RangeInclusive<u64>,
        blocks: &[&RawBlock],
        chain_height: u64,
    ) -> Result<BTreeMap<u64, B256>> {
        let expected = range.end() - range.start() + 1;
        eyre::ensure!(
            blocks.len() as u64 == expected,
            "node returned {} of {} blocks",
            blocks.len(),
            expected
        );

        // Heights are fetched one by one, so a re-org between two requests
        // shows up as a block that does not extend the one below it.
        let mut parent = range
            .start()
            .checked_sub(1)
            .and_then(|below| self.pool.recorded_hash(below));
        for block in blocks {
            if let Some(parent) = parent {
                eyre::ensure!(
                    block.parent_hash == parent,
                    "block {} does not extend recorded block {} ({})",
                    block.number,
                    block.number.saturating_sub(1),
                    parent
                );
            }
            parent = Some(block.hash);
        }

        let mut hashes = BTreeMap::new();
        for block in blocks {
            self.processor
                .handle_single_block(&self.store, block, chain_height)?;
            hashes.insert(block.number, block.hash);
        }
        Ok(hashes)
    }

    async fn reconcile(&mut self, chain_height: u64, report: &mut CycleReport) -> Result<()> {
        match self.pool.check_forks(self.chain.as_ref(), chain_height).await {
            Ok(Some(fork_height)) => {
                report.fork_at = Some(fork_height);
                if self.processor.persist() {
                    let removed = self
                        .store
                        .rollback_from(fork_height)
                        .wrap_err("failed to roll back forked blocks")?;
                    info!(fork_height, removed, "rolled back forked blocks");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "fork check failed, retrying next cycle"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChain;
    use crate::task_pool::TaskStatus;
    use alloy::primitives::{Address, Bytes, U256};
    use bee_abi::ContractArtifact;
    use bee_data::{FetchError, RawTransaction, Store};
    use std::time::Duration;

    const ABI: &str = r#"[{"type":"function","name":"set","inputs":[{"name":"v","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}]"#;

    fn registry() -> Arc<MethodRegistry> {
        let artifact = ContractArtifact::new("Box", "0x6080", ABI).unwrap();
        Arc::new(MethodRegistry::build(&[artifact]).unwrap())
    }

    fn config(start_height: u64) -> CrawlConfig {
        CrawlConfig {
            start_height,
            batch_unit: 3,
            poll_interval: Duration::from_millis(1),
            fork_window: 2,
            fetch_backoff: Duration::ZERO,
            ..CrawlConfig::default()
        }
    }

    fn crawler(chain: &Arc<MockChain>, start_height: u64) -> Crawler<MockChain, Store> {
        let store = Store::new(":memory:").unwrap();
        Crawler::new(Arc::clone(chain), store, registry(), config(start_height)).unwrap()
    }

    #[tokio::test]
    async fn cycles_claim_consecutive_batches() {
        let chain = Arc::new(MockChain::new(55));
        let mut crawler = crawler(&chain, 50);
        let cancel = CancellationToken::new();

        let first = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(first.prepared, Some(50..=52));
        assert_eq!(first.processed_blocks, 3);

        let second = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(second.prepared, Some(53..=55));
        assert!(!second.certain);
        assert_eq!(crawler.pool().task_pool_height(), 56);
    }

    #[tokio::test]
    async fn cursor_advances_once_ranges_settle() {
        let chain = Arc::new(MockChain::new(55));
        let mut crawler = crawler(&chain, 50);
        let cancel = CancellationToken::new();

        crawler.run_cycle(&cancel).await.unwrap();
        crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(crawler.pool().cursor(), 50);

        chain.set_height(70);
        let report = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.cursor, Some(59));
        assert_eq!(crawler.store().load_start_height().unwrap(), Some(59));
    }

    #[tokio::test]
    async fn fork_rolls_back_and_refetches() {
        let chain = Arc::new(MockChain::new(55));
        chain.set_transactions(
            54,
            vec![RawTransaction {
                hash: B256::repeat_byte(0x54),
                index: 0,
                from: Address::repeat_byte(0x01),
                to: Some(Address::repeat_byte(0x02)),
                value: U256::ZERO,
                input: Bytes::from_static(&[0x12, 0x34, 0x56, 0x78]),
                success: true,
                gas_used: 21_000,
                contract_address: None,
                logs: Vec::new(),
            }],
        );
        let mut crawler = crawler(&chain, 53);
        let cancel = CancellationToken::new();

        crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(crawler.pool().get(53).unwrap().status, TaskStatus::Completed);
        let stored = crawler.store().block_hash(54).unwrap();
        assert_eq!(stored, Some(chain.hash_at(54).to_string()));

        chain.reorg_from(54);
        let report = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.fork_at, Some(54));
        assert_eq!(crawler.store().block_hash(54).unwrap(), None);
        assert!(crawler.store().block_hash(53).unwrap().is_some());
        // invalidated task is queued for retry in the same cycle
        assert_eq!(crawler.pool().get(53).unwrap().status, TaskStatus::Pending);

        crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(
            crawler.store().block_hash(54).unwrap(),
            Some(chain.hash_at(54).to_string())
        );
    }

    #[tokio::test]
    async fn batch_not_extending_recorded_block_is_failed() {
        let chain = Arc::new(MockChain::new(55));
        let mut crawler = crawler(&chain, 50);
        let cancel = CancellationToken::new();

        crawler.run_cycle(&cancel).await.unwrap();
        let stale = crawler.pool().recorded_hash(52).unwrap();

        // 53 now builds on a block the pool never saw
        chain.reorg_from(52);
        let report = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.failed_tasks, 1);
        assert_eq!(report.processed_blocks, 0);
        assert_eq!(report.fork_at, Some(52));
        assert_eq!(crawler.store().block_hash(53).unwrap(), None);
        assert_ne!(chain.hash_at(52), stale);

        crawler.run_cycle(&cancel).await.unwrap();
        crawler.run_cycle(&cancel).await.unwrap();
        for height in 50..=55 {
            assert_eq!(
                crawler.store().block_hash(height).unwrap(),
                Some(chain.hash_at(height).to_string())
            );
        }
    }

    /// Serves blocks but never answers hash queries.
    struct StalledHashes(MockChain);

    impl ChainNode for StalledHashes {
        async fn get_current_height(&self) -> Result<u64, FetchError> {
            self.0.get_current_height().await
        }

        async fn get_block(&self, height: u64) -> Result<RawBlock, FetchError> {
            self.0.get_block(height).await
        }

        async fn get_block_hash(&self, _height: u64) -> Result<B256, FetchError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_fork_check() {
        let chain = Arc::new(StalledHashes(MockChain::new(55)));
        let store = Store::new(":memory:").unwrap();
        let mut crawler = Crawler::new(chain, store, registry(), config(53)).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = crawler.run_cycle(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed_blocks, 3);
        assert_eq!(report.fork_at, None);
        assert_eq!(crawler.pool().get(53).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_block_fetch_keeps_task_in_flight() {
        let chain = Arc::new(MockChain::new(100));
        chain.fail_block(11);
        let mut crawler = crawler(&chain, 10);
        let cancel = CancellationToken::new();

        let report = crawler.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.processed_blocks, 0);
        assert_eq!(crawler.pool().get(10).unwrap().status, TaskStatus::InFlight);
        assert_eq!(crawler.store().block_hash(10).unwrap(), None);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let chain = Arc::new(MockChain::new(5));
        let mut crawler = crawler(&chain, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        crawler.run(cancel).await.unwrap();
        assert_eq!(crawler.pool().len(), 0);
    }

    #[tokio::test]
    async fn resumes_from_persisted_cursor() {
        let chain = Arc::new(MockChain::new(100));
        let store = Store::new(":memory:").unwrap();
        store.advance_height(40).unwrap();

        let crawler = Crawler::new(chain, store, registry(), config(10)).unwrap();
        assert_eq!(crawler.start_height(), 40);
    }
}
