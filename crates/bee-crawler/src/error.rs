use thiserror::Error;

use crate::task_pool::TaskStatus;

/// Task bookkeeping violation. Always a bug in the caller, so fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskPoolError {
    #[error("invalid range [{from}, {to}]: end is below start")]
    InvalidRange { from: u64, to: u64 },
    #[error("range [{from}, {to}] overlaps task [{existing_from}, {existing_to}]")]
    Overlap {
        from: u64,
        to: u64,
        existing_from: u64,
        existing_to: u64,
    },
    #[error("range starting at {from} is below the cursor {cursor}")]
    BelowCursor { from: u64, cursor: u64 },
    #[error("no task starts at height {0}")]
    UnknownTask(u64),
    #[error("task at {from} cannot move from {current:?} to {next:?}")]
    IllegalTransition {
        from: u64,
        current: TaskStatus,
        next: TaskStatus,
    },
}
