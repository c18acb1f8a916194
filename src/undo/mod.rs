//! Undo logs.
//!
//! Every data-modifying statement of a branch leaves a [`SqlUndoLog`] with its
//! before and after images. At local commit the branch's items are bundled
//! into a [`BranchUndoLog`] and handed to the coordinator. On global rollback
//! the [`UndoExecutor`] replays them backwards as compensating statements,
//! after the dialect's [`UndoGuard`] check and optional data validation.

mod error;
mod executor;
mod guard;
mod log;

pub use error::{UndoError, UndoResult};
pub use executor::UndoExecutor;
pub use guard::{guard_for, UndoGuard};
pub use log::{BranchUndoLog, SqlType, SqlUndoLog};
