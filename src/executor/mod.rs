//! Statement executors.
//!
//! Every DML statement on an intercepting connection runs through the same
//! template: before image, statement, after image, lock key, undo item. The
//! per-kind executors (INSERT, UPDATE, DELETE) differ only in how they
//! capture the two images. SELECT ... FOR UPDATE checks the global lock on
//! the rows it read, and everything else passes straight through.

mod base;
mod delete;
mod error;
mod insert;
mod plain;
mod select_for_update;
mod update;

pub use base::{build_lock_key, TransactionalExecutor};
pub use error::{ErrorKind, ExecuteError, ExecuteResult};
pub use plain::PlainExecutor;
