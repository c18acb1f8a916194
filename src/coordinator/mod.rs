//! Transaction coordinator capability.
//!
//! Branch registration doubles as global lock acquisition: the coordinator
//! grants the branch's lock keys or refuses them with a lock conflict.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Branch identifier assigned by the coordinator.
pub type BranchId = i64;

/// Result type for coordinator calls.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Coordinator errors.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    /// Another global transaction holds one of the requested rows.
    #[error("global lock conflict on {lock_keys}")]
    LockConflict { lock_keys: String },

    #[error("coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("coordinator rejected request: {0}")]
    Rejected(String),
}

impl CoordinatorError {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, CoordinatorError::LockConflict { .. })
    }
}

/// Phase outcome reported for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    PhaseOneDone,
    PhaseOneFailed,
    PhaseTwoCommitted,
    PhaseTwoRolledBack,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchStatus::PhaseOneDone => "phase_one_done",
            BranchStatus::PhaseOneFailed => "phase_one_failed",
            BranchStatus::PhaseTwoCommitted => "phase_two_committed",
            BranchStatus::PhaseTwoRolledBack => "phase_two_rolled_back",
        };
        write!(f, "{}", s)
    }
}

/// Client side of the coordinator protocol.
///
/// Shared by every connection of a data source.
pub trait Coordinator: Send + Sync {
    /// Register a branch of `xid` and acquire `lock_keys` for it.
    ///
    /// Fails with [`CoordinatorError::LockConflict`] when another global
    /// transaction holds any of the keys.
    fn branch_register(
        &self,
        xid: &str,
        resource_id: &str,
        lock_keys: &str,
    ) -> CoordinatorResult<BranchId>;

    /// Check whether `lock_keys` are free, without acquiring them.
    fn lock_query(&self, xid: Option<&str>, resource_id: &str, lock_keys: &str)
        -> CoordinatorResult<bool>;

    /// Hand over the serialized undo log of a branch.
    fn register_undo_log(
        &self,
        xid: &str,
        branch_id: BranchId,
        payload: &[u8],
    ) -> CoordinatorResult<()>;

    /// Report the phase outcome of a branch.
    fn branch_report(
        &self,
        xid: &str,
        branch_id: BranchId,
        status: BranchStatus,
    ) -> CoordinatorResult<()>;
}
