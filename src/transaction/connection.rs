//! Data source and connection proxies.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::context::ConnectionContext;
use super::retry::{LockRetryPolicy, RetryScope};
use crate::catalog::{SchemaError, TableMeta, TableMetaCache};
use crate::config::RmConfig;
use crate::coordinator::{BranchStatus, Coordinator};
use crate::driver::{Driver, StatementResult};
use crate::executor::{ExecuteError, ExecuteResult, PlainExecutor, TransactionalExecutor};
use crate::sql::{dialect_for, DbType, SqlRecognizer};
use crate::types::SqlValue;
use crate::undo::{BranchUndoLog, UndoExecutor};

struct DataSourceInner {
    resource_id: String,
    db_type: DbType,
    config: RmConfig,
    coordinator: Arc<dyn Coordinator>,
    meta_cache: TableMetaCache,
}

/// One resource under the resource manager's control.
///
/// Hands out [`ConnectionProxy`] wrappers around driver connections and
/// owns what they share: configuration, the coordinator client and the
/// table metadata cache. Cloning is cheap.
#[derive(Clone)]
pub struct DataSourceProxy {
    inner: Arc<DataSourceInner>,
}

impl DataSourceProxy {
    pub fn new(
        resource_id: impl Into<String>,
        db_type: DbType,
        config: RmConfig,
        coordinator: Arc<dyn Coordinator>,
    ) -> ExecuteResult<Self> {
        dialect_for(db_type)?;
        config.validate()?;
        Ok(Self {
            inner: Arc::new(DataSourceInner {
                resource_id: resource_id.into(),
                db_type,
                config,
                coordinator,
                meta_cache: TableMetaCache::new(),
            }),
        })
    }

    pub fn resource_id(&self) -> &str {
        &self.inner.resource_id
    }

    pub fn db_type(&self) -> DbType {
        self.inner.db_type
    }

    pub fn config(&self) -> &RmConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.inner.coordinator
    }

    pub fn meta_cache(&self) -> &TableMetaCache {
        &self.inner.meta_cache
    }

    /// Wrap a driver connection of this data source.
    pub fn connect(&self, driver: Box<dyn Driver>) -> ExecuteResult<ConnectionProxy> {
        if driver.db_type() != self.inner.db_type {
            return Err(ExecuteError::InvalidState(format!(
                "driver speaks {} but data source {} is {}",
                driver.db_type(),
                self.inner.resource_id,
                self.inner.db_type
            )));
        }
        Ok(ConnectionProxy {
            data_source: self.clone(),
            target: driver,
            context: ConnectionContext::new(),
            global_lock_mode: false,
        })
    }

    /// Compensate a branch from its serialized undo log.
    ///
    /// Items are applied newest first in one local transaction on `driver`.
    /// Returns the number of items that changed data.
    pub fn branch_rollback(&self, driver: &mut dyn Driver, payload: &[u8]) -> ExecuteResult<usize> {
        let undo_log = BranchUndoLog::decode(payload)?;
        let executor = UndoExecutor::new(self.inner.db_type, self.inner.config.data_validation)?;
        info!(
            xid = %undo_log.xid,
            branch_id = undo_log.branch_id,
            items = undo_log.sql_undo_logs.len(),
            "rolling back branch"
        );

        let auto_commit = driver.auto_commit();
        if auto_commit {
            driver.set_auto_commit(false)?;
        }

        let result = undo_log
            .sql_undo_logs
            .iter()
            .rev()
            .try_fold(0, |applied, item| {
                executor
                    .execute_on(driver, item)
                    .map(|changed| applied + usize::from(changed))
            })
            .map_err(ExecuteError::from)
            .and_then(|applied| {
                driver.commit()?;
                Ok(applied)
            });

        if result.is_err() {
            if let Err(e) = driver.rollback() {
                error!(xid = %undo_log.xid, error = %e, "rollback after failed undo failed");
            }
        }
        if auto_commit {
            if let Err(e) = driver.set_auto_commit(true) {
                error!(error = %e, "failed to restore auto-commit");
            }
        }
        result
    }
}

impl std::fmt::Debug for DataSourceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceProxy")
            .field("resource_id", &self.inner.resource_id)
            .field("db_type", &self.inner.db_type)
            .finish()
    }
}

/// A driver connection taking part in distributed transactions.
///
/// Statements run through [`ConnectionProxy::execute`] are intercepted while
/// the connection is bound to a global transaction or asked to honour
/// global locks; otherwise they go straight to the driver.
pub struct ConnectionProxy {
    data_source: DataSourceProxy,
    target: Box<dyn Driver>,
    context: ConnectionContext,
    global_lock_mode: bool,
}

impl ConnectionProxy {
    pub fn data_source(&self) -> &DataSourceProxy {
        &self.data_source
    }

    pub fn db_type(&self) -> DbType {
        self.data_source.db_type()
    }

    pub fn config(&self) -> &RmConfig {
        self.data_source.config()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ConnectionContext {
        &mut self.context
    }

    pub(crate) fn target_mut(&mut self) -> &mut dyn Driver {
        self.target.as_mut()
    }

    /// Bind the connection to global transaction `xid`.
    pub fn bind(&mut self, xid: impl Into<String>) {
        self.context.bind(xid);
    }

    pub fn unbind(&mut self) -> Option<String> {
        self.context.unbind()
    }

    /// Check global locks at commit without joining a global transaction.
    pub fn require_global_lock(&mut self, value: bool) {
        self.global_lock_mode = value;
    }

    pub fn is_global_lock_mode(&self) -> bool {
        self.global_lock_mode
    }

    /// Whether statements are intercepted.
    pub fn is_intercepting(&self) -> bool {
        self.context.in_global_transaction() || self.global_lock_mode
    }

    pub fn auto_commit(&self) -> bool {
        self.target.auto_commit()
    }

    /// Switch auto-commit. Turning it on commits pending work first.
    pub fn set_auto_commit(&mut self, auto_commit: bool) -> ExecuteResult<()> {
        if auto_commit && !self.target.auto_commit() {
            self.commit()?;
        }
        self.target.set_auto_commit(auto_commit)?;
        Ok(())
    }

    /// Run one statement.
    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> ExecuteResult<StatementResult> {
        if !self.is_intercepting() {
            return PlainExecutor::execute(self, sql, params);
        }
        let recognizer = SqlRecognizer::recognize(self.db_type(), sql)?;
        TransactionalExecutor::new(recognizer, params).execute(self)
    }

    /// Commit the local transaction under the configured lock retry policy.
    pub fn commit(&mut self) -> ExecuteResult<()> {
        let policy = LockRetryPolicy::from_config(self.config(), RetryScope::Commit);
        policy.execute(self, |conn| conn.do_commit())
    }

    /// One commit attempt: acquire global locks, hand over the undo log and
    /// commit locally.
    pub(crate) fn do_commit(&mut self) -> ExecuteResult<()> {
        if self.context.in_global_transaction() {
            self.commit_in_global_transaction()
        } else if self.global_lock_mode && self.context.is_global_lock_require() {
            if let Some(lock_keys) = self.context.build_lock_keys() {
                self.check_lock(&lock_keys)?;
            }
            self.target.commit()?;
            self.context.reset();
            Ok(())
        } else {
            self.target.commit()?;
            self.context.reset();
            Ok(())
        }
    }

    fn commit_in_global_transaction(&mut self) -> ExecuteResult<()> {
        let xid = self
            .context
            .xid()
            .map(str::to_string)
            .ok_or_else(|| ExecuteError::InvalidState("no global transaction bound".into()))?;

        if self.context.has_undo_log() {
            let lock_keys = self.context.build_lock_keys().unwrap_or_default();
            let branch_id = self.data_source.coordinator().branch_register(
                &xid,
                self.data_source.resource_id(),
                &lock_keys,
            )?;
            self.context.set_branch_id(branch_id);
            debug!(%xid, branch_id, %lock_keys, "branch registered");

            let undo_log = BranchUndoLog::new(xid.clone(), branch_id, self.context.undo_items().to_vec());
            let payload = undo_log.encode()?;
            self.data_source
                .coordinator()
                .register_undo_log(&xid, branch_id, &payload)?;
        }

        if let Err(e) = self.target.commit() {
            self.report(&xid, BranchStatus::PhaseOneFailed);
            return Err(e.into());
        }
        if self.config().report_success_enable {
            self.report(&xid, BranchStatus::PhaseOneDone);
        }
        debug!(%xid, local_tx = %self.context.local_tx_id(), "local transaction committed");
        self.context.reset();
        Ok(())
    }

    /// Roll back the local transaction and discard its undo items.
    pub fn rollback(&mut self) -> ExecuteResult<()> {
        self.target.rollback()?;
        if let Some(xid) = self.context.xid().map(str::to_string) {
            self.report(&xid, BranchStatus::PhaseOneFailed);
        }
        self.context.reset();
        Ok(())
    }

    /// Report the branch phase outcome; failures are logged, not raised.
    fn report(&self, xid: &str, status: BranchStatus) {
        let Some(branch_id) = self.context.branch_id() else {
            return;
        };
        if let Err(e) = self
            .data_source
            .coordinator()
            .branch_report(xid, branch_id, status)
        {
            error!(%xid, branch_id, %status, error = %e, "branch report failed");
        }
    }

    /// Fail with a lock conflict if another global transaction holds any of
    /// `lock_keys`.
    pub(crate) fn check_lock(&self, lock_keys: &str) -> ExecuteResult<()> {
        let lockable = self.data_source.coordinator().lock_query(
            self.context.xid(),
            self.data_source.resource_id(),
            lock_keys,
        )?;
        if lockable {
            Ok(())
        } else {
            Err(ExecuteError::LockConflict {
                lock_keys: lock_keys.to_string(),
            })
        }
    }

    /// Metadata of `table`, loaded through the driver on first use.
    pub(crate) fn table_meta(&mut self, table: &str) -> ExecuteResult<Arc<TableMeta>> {
        let db_type = self.data_source.db_type();
        let target = &mut self.target;
        let meta = self
            .data_source
            .meta_cache()
            .get_or_load(db_type, table, || {
                target
                    .table_meta(table)
                    .map_err(|e| SchemaError::Load(e.to_string()))
            })?;
        Ok(meta)
    }
}

impl std::fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("data_source", &self.data_source)
            .field("context", &self.context)
            .field("global_lock_mode", &self.global_lock_mode)
            .finish()
    }
}
