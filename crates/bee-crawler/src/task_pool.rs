//! In-memory pool of block-range tasks.
//!
//! Tasks are contiguous, non-overlapping `[from, to]` ranges keyed by their
//! start height. The pool sits above a durable cursor: every height below
//! the cursor has been processed and is past the fork window, every height
//! from the cursor up to [`TaskPool::task_pool_height`] belongs to exactly
//! one task.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use alloy::primitives::B256;
use bee_data::{ChainNode, FetchError};
use tracing::{debug, info, warn};

use crate::error::TaskPoolError;

/// Lifecycle of a task.
///
/// `Pending -> InFlight -> Completed | Failed | Expired`. Failed and expired
/// tasks return to `Pending` for retry. A completed task only moves again
/// when a fork invalidates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
    Expired,
}

impl TaskStatus {
    fn can_become(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Completed)
                | (InFlight, Failed)
                | (InFlight, Expired)
                | (Failed, Pending)
                | (Expired, Pending)
                | (Completed, Failed)
        )
    }
}

/// A contiguous range of heights fetched and processed as one unit.
#[derive(Clone, Debug)]
pub struct BlockTask {
    pub from_height: u64,
    pub to_height: u64,
    pub created_at: Instant,
    pub dispatched_at: Option<Instant>,
    pub status: TaskStatus,
    /// Entire range is behind the fork window of the head seen at creation.
    pub certain: bool,
    pub attempts: u32,
    block_hashes: BTreeMap<u64, B256>,
}

impl BlockTask {
    fn new(from_height: u64, to_height: u64, certain: bool) -> Self {
        Self {
            from_height,
            to_height,
            created_at: Instant::now(),
            dispatched_at: None,
            status: TaskStatus::Pending,
            certain,
            attempts: 0,
            block_hashes: BTreeMap::new(),
        }
    }

    pub fn heights(&self) -> RangeInclusive<u64> {
        self.from_height..=self.to_height
    }

    pub fn block_count(&self) -> u64 {
        self.to_height - self.from_height + 1
    }

    /// Hashes recorded when the task completed, by height.
    pub fn block_hashes(&self) -> &BTreeMap<u64, B256> {
        &self.block_hashes
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskPoolError> {
        if !self.status.can_become(next) {
            return Err(TaskPoolError::IllegalTransition {
                from: self.from_height,
                current: self.status,
                next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Result of the gap and overshoot check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskCountReport {
    /// Heights between the start height and the pool height.
    pub expected: u64,
    /// Heights accounted for by the cursor and the tasks.
    pub covered: u64,
    pub pool_height: u64,
    pub consistent: bool,
}

/// Ordered task set above the cursor.
#[derive(Debug)]
pub struct TaskPool {
    cursor: u64,
    fork_window: u64,
    task_timeout: Duration,
    tasks: BTreeMap<u64, BlockTask>,
    // hash of the block just below the cursor, when known
    settled_tip: Option<B256>,
}

impl TaskPool {
    pub fn new(cursor: u64, fork_window: u64, task_timeout: Duration) -> Self {
        Self {
            cursor,
            fork_window,
            task_timeout,
            tasks: BTreeMap::new(),
            settled_tip: None,
        }
    }

    /// Lowest height not yet folded into the durable cursor.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, from_height: u64) -> Option<&BlockTask> {
        self.tasks.get(&from_height)
    }

    /// Tasks in ascending height order.
    pub fn tasks(&self) -> impl Iterator<Item = &BlockTask> {
        self.tasks.values()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.values().any(|t| t.status == TaskStatus::Pending)
    }

    /// Completed tasks whose range may still be re-organized.
    pub fn has_uncertain_completed(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.status == TaskStatus::Completed && !t.certain)
    }

    /// Whether `[.., to_height]` is past the fork window of a head at `current_height`.
    pub fn is_certain(&self, to_height: u64, current_height: u64) -> bool {
        to_height.saturating_add(1) < current_height.saturating_sub(self.fork_window)
    }

    /// Hash recorded for `height` by a completed task, or by the last task
    /// folded into the cursor.
    pub fn recorded_hash(&self, height: u64) -> Option<B256> {
        if height.checked_add(1) == Some(self.cursor) {
            return self.settled_tip;
        }
        self.tasks
            .range(..=height)
            .next_back()
            .map(|(_, t)| t)
            .filter(|t| t.status == TaskStatus::Completed && t.to_height >= height)
            .and_then(|t| t.block_hashes.get(&height).copied())
    }

    /// Next height not covered by any task.
    pub fn task_pool_height(&self) -> u64 {
        self.tasks
            .values()
            .next_back()
            .map_or(self.cursor, |t| t.to_height + 1)
    }

    /// Adds a pending task for `[from, to]`.
    ///
    /// # Errors
    /// Returns `TaskPoolError` if the range is inverted, lies below the
    /// cursor, or intersects an existing task.
    pub fn prepare_task(
        &mut self,
        from: u64,
        to: u64,
        certain: bool,
    ) -> Result<&BlockTask, TaskPoolError> {
        if to < from {
            return Err(TaskPoolError::InvalidRange { from, to });
        }
        if from < self.cursor {
            return Err(TaskPoolError::BelowCursor {
                from,
                cursor: self.cursor,
            });
        }
        // Only the last task starting at or below `to` can reach into the range
        if let Some(existing) = self.tasks.range(..=to).next_back().map(|(_, t)| t) {
            if existing.to_height >= from {
                return Err(TaskPoolError::Overlap {
                    from,
                    to,
                    existing_from: existing.from_height,
                    existing_to: existing.to_height,
                });
            }
        }

        debug!(from, to, certain, "prepared task");
        Ok(self
            .tasks
            .entry(from)
            .or_insert_with(|| BlockTask::new(from, to, certain)))
    }

    /// Claims pending tasks in height order up to `max_blocks` heights and
    /// marks them in flight. The first pending task is always claimed.
    pub fn claim(&mut self, max_blocks: u64) -> Vec<RangeInclusive<u64>> {
        let now = Instant::now();
        let mut claimed = Vec::new();
        let mut budget = 0u64;

        for task in self.tasks.values_mut() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            if !claimed.is_empty() && budget + task.block_count() > max_blocks {
                break;
            }
            budget += task.block_count();
            task.status = TaskStatus::InFlight;
            task.dispatched_at = Some(now);
            task.attempts += 1;
            claimed.push(task.heights());
        }
        claimed
    }

    /// Records a finished task and the hashes of its blocks.
    ///
    /// # Errors
    /// Returns `TaskPoolError` if no task starts at `from_height` or it is
    /// not in flight.
    pub fn complete(
        &mut self,
        from_height: u64,
        block_hashes: BTreeMap<u64, B256>,
    ) -> Result<(), TaskPoolError> {
        let task = self
            .tasks
            .get_mut(&from_height)
            .ok_or(TaskPoolError::UnknownTask(from_height))?;
        task.transition(TaskStatus::Completed)?;
        task.block_hashes = block_hashes;
        Ok(())
    }

    /// Marks an in-flight task as failed.
    ///
    /// # Errors
    /// Returns `TaskPoolError` if no task starts at `from_height` or it is
    /// not in flight.
    pub fn fail(&mut self, from_height: u64) -> Result<(), TaskPoolError> {
        let task = self
            .tasks
            .get_mut(&from_height)
            .ok_or(TaskPoolError::UnknownTask(from_height))?;
        task.transition(TaskStatus::Failed)
    }

    /// Fails every in-flight task. Used when a fetch is abandoned.
    pub fn fail_in_flight(&mut self) -> usize {
        let mut failed = 0;
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InFlight {
                task.status = TaskStatus::Failed;
                failed += 1;
            }
        }
        failed
    }

    /// Compares recorded hashes of uncertain completed tasks with the chain.
    ///
    /// Returns the lowest diverging height, after failing every task that
    /// reaches it. Without divergence, tasks that fell behind the fork window
    /// become certain.
    ///
    /// # Errors
    /// Returns `FetchError` if a hash query fails. The pool is left unchanged.
    pub async fn check_forks<C: ChainNode>(
        &mut self,
        chain: &C,
        current_height: u64,
    ) -> Result<Option<u64>, FetchError> {
        let candidates: Vec<(u64, u64, BTreeMap<u64, B256>)> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed && !t.certain)
            .map(|t| (t.from_height, t.to_height, t.block_hashes.clone()))
            .collect();

        let mut fork_at = None;
        'tasks: for (from, to, hashes) in candidates {
            // Completed ranges are parent-linked, so a matching top hash
            // covers every block below it
            let Some(recorded_top) = hashes.get(&to) else {
                continue;
            };
            if chain.get_block_hash(to).await? == *recorded_top {
                continue;
            }
            for (&height, recorded) in &hashes {
                if chain.get_block_hash(height).await? != *recorded {
                    fork_at = Some(height);
                    break 'tasks;
                }
            }
            fork_at = Some(from);
            break;
        }

        let Some(fork_height) = fork_at else {
            for task in self.tasks.values_mut() {
                if task.status == TaskStatus::Completed && !task.certain {
                    task.certain = task.to_height.saturating_add(1)
                        < current_height.saturating_sub(self.fork_window);
                }
            }
            return Ok(None);
        };

        let mut invalidated = 0;
        for task in self.tasks.values_mut() {
            if task.to_height < fork_height {
                continue;
            }
            if matches!(task.status, TaskStatus::Completed | TaskStatus::InFlight) {
                task.status = TaskStatus::Failed;
                task.certain = false;
                task.block_hashes.clear();
                invalidated += 1;
            }
        }
        warn!(fork_height, invalidated, "chain fork detected, tasks invalidated");
        Ok(Some(fork_height))
    }

    /// Checks that the cursor and tasks cover `[start_height, pool_height)`
    /// without gaps and that the pool is not ahead of the chain.
    pub fn check_task_count(&self, start_height: u64, current_height: u64) -> TaskCountReport {
        let pool_height = self.task_pool_height();
        let expected = pool_height.saturating_sub(start_height);
        let covered = self.cursor.saturating_sub(start_height)
            + self.tasks.values().map(BlockTask::block_count).sum::<u64>();
        let ahead = pool_height > current_height.saturating_add(1);
        let consistent = covered == expected && !ahead;

        if !consistent {
            warn!(
                expected,
                covered,
                pool_height,
                current_height,
                "task pool does not match the expected height range"
            );
        }
        TaskCountReport {
            expected,
            covered,
            pool_height,
            consistent,
        }
    }

    pub fn check_time_out(&mut self) -> usize {
        self.check_time_out_at(Instant::now())
    }

    /// Expires in-flight tasks dispatched longer than the timeout before `now`.
    pub fn check_time_out_at(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for task in self.tasks.values_mut() {
            if task.status != TaskStatus::InFlight {
                continue;
            }
            let Some(dispatched_at) = task.dispatched_at else {
                continue;
            };
            if now.saturating_duration_since(dispatched_at) > self.task_timeout {
                warn!(
                    from = task.from_height,
                    to = task.to_height,
                    "task timed out"
                );
                task.status = TaskStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Returns failed and expired tasks to pending.
    pub fn process_errors(&mut self) -> usize {
        let mut retried = 0;
        for task in self.tasks.values_mut() {
            if matches!(task.status, TaskStatus::Failed | TaskStatus::Expired) {
                debug!(
                    from = task.from_height,
                    to = task.to_height,
                    attempts = task.attempts,
                    "retrying task"
                );
                task.status = TaskStatus::Pending;
                task.dispatched_at = None;
                retried += 1;
            }
        }
        retried
    }

    /// Folds leading completed and certain tasks into the cursor.
    ///
    /// Returns the new cursor if it moved.
    pub fn advance_cursor(&mut self) -> Option<u64> {
        let before = self.cursor;
        while let Some(entry) = self.tasks.first_entry() {
            let task = entry.get();
            if task.from_height != self.cursor
                || task.status != TaskStatus::Completed
                || !task.certain
            {
                break;
            }
            self.cursor = task.to_height + 1;
            self.settled_tip = task.block_hashes.get(&task.to_height).copied();
            entry.remove();
        }

        if self.cursor == before {
            return None;
        }
        info!(cursor = self.cursor, "cursor advanced");
        Some(self.cursor)
    }
}
