//! Scripted driver and coordinator doubles for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::catalog::TableMeta;
use crate::config::RmConfig;
use crate::coordinator::{BranchId, BranchStatus, Coordinator, CoordinatorError, CoordinatorResult};
use crate::driver::{Driver, DriverError, DriverResult, ExecuteOutcome, ResultSet};
use crate::sql::DbType;
use crate::transaction::{ConnectionProxy, DataSourceProxy};
use crate::types::SqlValue;

/// A call observed by [`FakeDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(String, Vec<SqlValue>),
    Execute(String, Vec<SqlValue>),
    SetAutoCommit(bool),
    Commit,
    Rollback,
}

#[derive(Debug)]
pub struct DriverState {
    pub auto_commit: bool,
    pub queries: VecDeque<DriverResult<ResultSet>>,
    pub executes: VecDeque<DriverResult<ExecuteOutcome>>,
    pub commits: VecDeque<DriverResult<()>>,
    pub calls: Vec<Call>,
    pub tables: HashMap<String, TableMeta>,
    pub meta_loads: usize,
}

/// Driver whose responses are scripted in FIFO order.
///
/// Clones share state, so a test can keep one handle for inspection while
/// the proxy owns another. Unscripted queries return no rows, unscripted
/// statements report one affected row, unscripted commits succeed.
#[derive(Debug, Clone)]
pub struct FakeDriver {
    db_type: DbType,
    state: Arc<Mutex<DriverState>>,
}

impl FakeDriver {
    pub fn new(db_type: DbType) -> Self {
        Self {
            db_type,
            state: Arc::new(Mutex::new(DriverState {
                auto_commit: true,
                queries: VecDeque::new(),
                executes: VecDeque::new(),
                commits: VecDeque::new(),
                calls: Vec::new(),
                tables: HashMap::new(),
                meta_loads: 0,
            })),
        }
    }

    pub fn with_table(self, meta: TableMeta) -> Self {
        self.state
            .lock()
            .tables
            .insert(meta.table_name.to_ascii_lowercase(), meta);
        self
    }

    pub fn push_query(&self, rs: ResultSet) {
        self.state.lock().queries.push_back(Ok(rs));
    }

    pub fn push_query_error(&self, err: DriverError) {
        self.state.lock().queries.push_back(Err(err));
    }

    pub fn push_execute(&self, outcome: ExecuteOutcome) {
        self.state.lock().executes.push_back(Ok(outcome));
    }

    pub fn push_execute_error(&self, err: DriverError) {
        self.state.lock().executes.push_back(Err(err));
    }

    pub fn push_commit_error(&self, err: DriverError) {
        self.state.lock().commits.push_back(Err(err));
    }

    pub fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn commits(&self) -> usize {
        self.count(|c| matches!(c, Call::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|c| matches!(c, Call::Rollback))
    }

    pub fn executes(&self) -> usize {
        self.count(|c| matches!(c, Call::Execute(..)))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

impl Driver for FakeDriver {
    fn db_type(&self) -> DbType {
        self.db_type
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<ResultSet> {
        let mut state = self.state.lock();
        state.calls.push(Call::Query(sql.to_string(), params.to_vec()));
        state.queries.pop_front().unwrap_or_else(|| Ok(ResultSet::empty()))
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<ExecuteOutcome> {
        let mut state = self.state.lock();
        state.calls.push(Call::Execute(sql.to_string(), params.to_vec()));
        state
            .executes
            .pop_front()
            .unwrap_or_else(|| Ok(ExecuteOutcome::new(1)))
    }

    fn auto_commit(&self) -> bool {
        self.state.lock().auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetAutoCommit(auto_commit));
        state.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Commit);
        state.commits.pop_front().unwrap_or(Ok(()))
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.state.lock().calls.push(Call::Rollback);
        Ok(())
    }

    fn table_meta(&mut self, table: &str) -> DriverResult<TableMeta> {
        let mut state = self.state.lock();
        state.meta_loads += 1;
        state
            .tables
            .get(&table.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DriverError::execution(format!("unknown table {}", table)))
    }
}

#[derive(Debug, Default)]
pub struct CoordinatorState {
    /// `branch_register` refuses this many requests with a lock conflict.
    pub conflicts_remaining: usize,
    /// `branch_register` fails with this error instead.
    pub register_error: Option<CoordinatorError>,
    /// `lock_query` reports the keys as held by someone else.
    pub locked: bool,
    pub registrations: Vec<(String, String, String)>,
    pub lock_queries: Vec<String>,
    pub undo_logs: Vec<(String, BranchId, Vec<u8>)>,
    pub reports: Vec<(String, BranchId, BranchStatus)>,
    next_branch_id: BranchId,
}

/// Coordinator double recording every request.
#[derive(Debug, Default)]
pub struct FakeCoordinator {
    state: Mutex<CoordinatorState>,
}

impl FakeCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_conflicts(conflicts: usize) -> Arc<Self> {
        let coordinator = Self::default();
        coordinator.state.lock().conflicts_remaining = conflicts;
        Arc::new(coordinator)
    }

    pub fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock()
    }
}

impl Coordinator for FakeCoordinator {
    fn branch_register(
        &self,
        xid: &str,
        resource_id: &str,
        lock_keys: &str,
    ) -> CoordinatorResult<BranchId> {
        let mut state = self.state.lock();
        state
            .registrations
            .push((xid.to_string(), resource_id.to_string(), lock_keys.to_string()));
        if let Some(err) = state.register_error.clone() {
            return Err(err);
        }
        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(CoordinatorError::LockConflict {
                lock_keys: lock_keys.to_string(),
            });
        }
        state.next_branch_id += 1;
        Ok(state.next_branch_id)
    }

    fn lock_query(
        &self,
        _xid: Option<&str>,
        _resource_id: &str,
        lock_keys: &str,
    ) -> CoordinatorResult<bool> {
        let mut state = self.state.lock();
        state.lock_queries.push(lock_keys.to_string());
        Ok(!state.locked)
    }

    fn register_undo_log(
        &self,
        xid: &str,
        branch_id: BranchId,
        payload: &[u8],
    ) -> CoordinatorResult<()> {
        self.state
            .lock()
            .undo_logs
            .push((xid.to_string(), branch_id, payload.to_vec()));
        Ok(())
    }

    fn branch_report(
        &self,
        xid: &str,
        branch_id: BranchId,
        status: BranchStatus,
    ) -> CoordinatorResult<()> {
        self.state
            .lock()
            .reports
            .push((xid.to_string(), branch_id, status));
        Ok(())
    }
}

/// A connection over `driver` with auto-commit off, bound to `xid-1`.
pub fn bound_connection(
    driver: &FakeDriver,
    config: RmConfig,
    coordinator: Arc<FakeCoordinator>,
) -> ConnectionProxy {
    let ds = DataSourceProxy::new("jdbc:test", driver.db_type, config, coordinator).unwrap();
    let mut conn = ds.connect(Box::new(driver.clone())).unwrap();
    conn.set_auto_commit(false).unwrap();
    conn.bind("xid-1");
    conn
}
