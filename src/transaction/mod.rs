//! Branch transactions on proxied connections.
//!
//! A [`ConnectionProxy`] wraps one driver connection. While it is bound to a
//! global transaction every DML statement is intercepted: the executors
//! capture row images and lock keys into the [`ConnectionContext`], and the
//! local commit registers the branch with the coordinator before committing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DataSourceProxy                         │
//! │   (resource id, config, coordinator, table metadata cache)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ connect
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConnectionProxy                         │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   Driver    │       │ Connection  │       │ LockRetry   │
//!  │  (target)   │       │  Context    │       │   Policy    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rm_datasource::transaction::DataSourceProxy;
//!
//! let ds = DataSourceProxy::new("jdbc:mysql://db/shop", DbType::MySql, config, coordinator)?;
//! let mut conn = ds.connect(driver)?;
//!
//! conn.set_auto_commit(false)?;
//! conn.bind(xid);
//! conn.execute("UPDATE account SET balance = balance - ? WHERE id = ?", &params)?;
//! conn.commit()?;  // or conn.rollback()?;
//! ```

mod connection;
mod context;
mod retry;

pub use connection::{ConnectionProxy, DataSourceProxy};
pub use context::{Cancellation, ConnectionContext};
pub use retry::{LockRetryMode, LockRetryPolicy, RetryScope, RetryState};
