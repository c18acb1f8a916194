//! rm-datasource - the write path of an AT-mode resource manager
//!
//! This crate wraps database connections taking part in distributed
//! transactions. Every data-modifying statement issued inside a global
//! transaction is intercepted: the affected rows are captured before and
//! after execution, a compensating undo item is derived from the two images,
//! and the rows' global lock is negotiated with the transaction coordinator
//! when the local transaction commits. A branch committed this way can always
//! be undone later from its undo log.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rm_datasource::config::RmConfig;
//! # use rm_datasource::coordinator::Coordinator;
//! # use rm_datasource::driver::Driver;
//! # use rm_datasource::sql::DbType;
//! # use rm_datasource::transaction::DataSourceProxy;
//! # fn demo(coordinator: Arc<dyn Coordinator>, driver: Box<dyn Driver>) -> rm_datasource::executor::ExecuteResult<()> {
//! let ds = DataSourceProxy::new("jdbc:mysql://db/shop", DbType::MySql, RmConfig::default(), coordinator)?;
//! let mut conn = ds.connect(driver)?;
//! conn.set_auto_commit(false)?;
//! conn.bind("xid-42");
//! conn.execute("UPDATE account SET balance = balance - 10 WHERE id = 1", &[])?;
//! conn.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod executor;
pub mod sql;
pub mod transaction;
pub mod types;
pub mod undo;

#[cfg(test)]
mod testing;
