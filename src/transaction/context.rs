//! Branch context of one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ulid::Ulid;

use crate::coordinator::BranchId;
use crate::undo::SqlUndoLog;

/// Cancellation handle shared between a caller and its connection.
///
/// The lock retry policy checks it before every sleep.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State a connection accumulates for the current local transaction.
///
/// Executors append lock keys and undo items; commit and rollback reset it.
/// The global transaction binding (`xid`) and the cancellation handle
/// survive a reset.
#[derive(Debug)]
pub struct ConnectionContext {
    local_tx_id: Ulid,
    xid: Option<String>,
    branch_id: Option<BranchId>,
    global_lock_require: bool,
    lock_keys: Vec<String>,
    undo_items: Vec<SqlUndoLog>,
    cancellation: Cancellation,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self {
            local_tx_id: Ulid::new(),
            xid: None,
            branch_id: None,
            global_lock_require: false,
            lock_keys: Vec::new(),
            undo_items: Vec::new(),
            cancellation: Cancellation::new(),
        }
    }

    /// Bind the connection to a global transaction.
    pub fn bind(&mut self, xid: impl Into<String>) {
        self.xid = Some(xid.into());
    }

    /// Drop the global transaction binding.
    pub fn unbind(&mut self) -> Option<String> {
        self.xid.take()
    }

    pub fn xid(&self) -> Option<&str> {
        self.xid.as_deref()
    }

    pub fn in_global_transaction(&self) -> bool {
        self.xid.is_some()
    }

    /// Correlation id of the current local transaction.
    pub fn local_tx_id(&self) -> Ulid {
        self.local_tx_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub(crate) fn set_branch_id(&mut self, branch_id: BranchId) {
        self.branch_id = Some(branch_id);
    }

    pub fn is_global_lock_require(&self) -> bool {
        self.global_lock_require
    }

    pub fn set_global_lock_require(&mut self, value: bool) {
        self.global_lock_require = value;
    }

    /// Append a lock key, ignoring duplicates.
    pub fn append_lock_key(&mut self, lock_key: impl Into<String>) {
        let lock_key = lock_key.into();
        if !self.lock_keys.contains(&lock_key) {
            self.lock_keys.push(lock_key);
        }
    }

    pub fn append_undo_item(&mut self, item: SqlUndoLog) {
        self.undo_items.push(item);
    }

    pub fn has_lock_key(&self) -> bool {
        !self.lock_keys.is_empty()
    }

    pub fn has_undo_log(&self) -> bool {
        !self.undo_items.is_empty()
    }

    pub fn lock_keys(&self) -> &[String] {
        &self.lock_keys
    }

    pub fn undo_items(&self) -> &[SqlUndoLog] {
        &self.undo_items
    }

    /// All lock keys joined with `;`, or `None` when there are none.
    pub fn build_lock_keys(&self) -> Option<String> {
        if self.lock_keys.is_empty() {
            None
        } else {
            Some(self.lock_keys.join(";"))
        }
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Share a caller's cancellation handle.
    pub fn set_cancellation(&mut self, cancellation: Cancellation) {
        self.cancellation = cancellation;
    }

    /// Clear local transaction state and start a new local transaction id.
    pub fn reset(&mut self) {
        self.local_tx_id = Ulid::new();
        self.branch_id = None;
        self.global_lock_require = false;
        self.lock_keys.clear();
        self.undo_items.clear();
    }
}
