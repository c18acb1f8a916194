//! Lock retry policy.
//!
//! Governs what a global lock conflict does to a local transaction: roll
//! back at once, or sleep and try again until a time bound runs out. Either
//! way a conflict that is given up on ends with exactly one rollback of the
//! target connection and a [`ExecuteError::LockWaitTimeout`].

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::connection::ConnectionProxy;
use crate::config::RmConfig;
use crate::executor::{ExecuteError, ExecuteResult};

/// What a lock conflict does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRetryMode {
    /// Roll back the local transaction on the first conflict.
    #[default]
    RollbackOnConflict,
    /// Sleep and retry until the configured bound is exceeded.
    Retry,
}

/// Unit of work one attempt re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// A single auto-committed statement. Local work is rolled back between
    /// attempts because the statement runs again.
    Statement,
    /// An explicit commit. Local work is kept between attempts.
    Commit,
}

/// Progress of one policy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Retrying,
    Committed,
    TimedOut,
    RolledBack,
}

/// Retry policy for lock conflicts.
#[derive(Debug, Clone)]
pub struct LockRetryPolicy {
    mode: LockRetryMode,
    interval: Duration,
    max_duration: Duration,
    scope: RetryScope,
}

impl LockRetryPolicy {
    pub fn new(
        mode: LockRetryMode,
        interval: Duration,
        max_duration: Duration,
        scope: RetryScope,
    ) -> Self {
        Self {
            mode,
            interval,
            max_duration,
            scope,
        }
    }

    pub fn from_config(config: &RmConfig, scope: RetryScope) -> Self {
        Self::new(
            config.lock_retry_mode,
            config.retry_interval(),
            config.max_retry_duration(),
            scope,
        )
    }

    pub fn mode(&self) -> LockRetryMode {
        self.mode
    }

    /// Run `attempt` under the policy.
    ///
    /// Non-conflict errors roll back the target once and surface unchanged.
    /// Rollback always goes to the target driver, never through the proxy.
    pub fn execute<T, F>(&self, conn: &mut ConnectionProxy, mut attempt: F) -> ExecuteResult<T>
    where
        F: FnMut(&mut ConnectionProxy) -> ExecuteResult<T>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            debug!(
                state = ?RetryState::Attempting,
                attempt = attempts,
                scope = ?self.scope,
                local_tx = %conn.context().local_tx_id(),
                "lock retry attempt"
            );

            let err = match attempt(conn) {
                Ok(value) => {
                    self.finish(RetryState::Committed, attempts, started);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_lock_conflict() {
                rollback_target(conn);
                self.finish(RetryState::RolledBack, attempts, started);
                return Err(err);
            }

            let elapsed = started.elapsed();
            let exhausted = match self.mode {
                LockRetryMode::RollbackOnConflict => true,
                LockRetryMode::Retry => elapsed + self.interval > self.max_duration,
            };
            if exhausted {
                warn!(
                    attempt = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "giving up on global lock"
                );
                rollback_target(conn);
                self.finish(RetryState::TimedOut, attempts, started);
                return Err(ExecuteError::LockWaitTimeout {
                    attempts,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }

            if conn.context().cancellation().is_cancelled() {
                rollback_target(conn);
                self.finish(RetryState::RolledBack, attempts, started);
                return Err(ExecuteError::Cancelled);
            }

            warn!(
                state = ?RetryState::Retrying,
                attempt = attempts,
                interval_ms = self.interval.as_millis() as u64,
                error = %err,
                "global lock conflict, retrying"
            );
            if self.scope == RetryScope::Statement {
                rollback_target(conn);
            }
            thread::sleep(self.interval);
        }
    }

    fn finish(&self, state: RetryState, attempts: u32, started: Instant) {
        debug!(
            ?state,
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lock retry finished"
        );
    }
}

/// Roll back the target driver and discard the local transaction state.
fn rollback_target(conn: &mut ConnectionProxy) {
    if let Err(e) = conn.target_mut().rollback() {
        error!(error = %e, "rollback of target connection failed");
    }
    conn.context_mut().reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use crate::sql::DbType;
    use crate::testing::{FakeCoordinator, FakeDriver};
    use crate::transaction::{Cancellation, DataSourceProxy};

    fn conflict() -> ExecuteError {
        ExecuteError::LockConflict {
            lock_keys: "t:1".into(),
        }
    }

    fn connection(driver: &FakeDriver) -> ConnectionProxy {
        let ds = DataSourceProxy::new("jdbc:test", DbType::MySql, RmConfig::default(), FakeCoordinator::new())
            .unwrap();
        ds.connect(Box::new(driver.clone())).unwrap()
    }

    fn retry_policy(max_ms: u64) -> LockRetryPolicy {
        LockRetryPolicy::new(
            LockRetryMode::Retry,
            Duration::from_millis(2),
            Duration::from_millis(max_ms),
            RetryScope::Commit,
        )
    }

    #[test]
    fn test_rollback_on_conflict_rolls_back_once() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);
        let policy = LockRetryPolicy::from_config(&RmConfig::default(), RetryScope::Commit);

        let mut calls = 0;
        let result: ExecuteResult<()> = policy.execute(&mut conn, |_| {
            calls += 1;
            Err(conflict())
        });

        assert!(matches!(result, Err(ExecuteError::LockWaitTimeout { attempts: 1, .. })));
        assert_eq!(calls, 1);
        assert_eq!(driver.rollbacks(), 1);
    }

    #[test]
    fn test_retry_until_success() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);

        let mut calls = 0;
        let result = retry_policy(1_000).execute(&mut conn, |_| {
            calls += 1;
            if calls < 3 {
                Err(conflict())
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(driver.rollbacks(), 0);
    }

    #[test]
    fn test_retry_times_out() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);

        let started = Instant::now();
        let result: ExecuteResult<()> = retry_policy(20).execute(&mut conn, |_| Err(conflict()));

        match result {
            Err(ExecuteError::LockWaitTimeout { attempts, .. }) => assert!(attempts > 1),
            other => panic!("Expected LockWaitTimeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(driver.rollbacks(), 1);
    }

    #[test]
    fn test_non_conflict_error_stops_retry() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);

        let mut calls = 0;
        let result: ExecuteResult<()> = retry_policy(1_000).execute(&mut conn, |_| {
            calls += 1;
            if calls == 1 {
                Err(conflict())
            } else {
                Err(DriverError::execution("disk full").into())
            }
        });

        assert!(matches!(result, Err(ExecuteError::Driver(_))));
        assert_eq!(calls, 2);
        assert_eq!(driver.rollbacks(), 1);
    }

    #[test]
    fn test_cancellation_before_sleep() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);
        let cancel = Cancellation::new();
        conn.context_mut().set_cancellation(cancel.clone());
        cancel.cancel();

        let result: ExecuteResult<()> = retry_policy(1_000).execute(&mut conn, |_| Err(conflict()));
        assert!(matches!(result, Err(ExecuteError::Cancelled)));
        assert_eq!(driver.rollbacks(), 1);
    }

    #[test]
    fn test_statement_scope_rolls_back_between_attempts() {
        let driver = FakeDriver::new(DbType::MySql);
        let mut conn = connection(&driver);
        let policy = LockRetryPolicy::new(
            LockRetryMode::Retry,
            Duration::from_millis(1),
            Duration::from_millis(1_000),
            RetryScope::Statement,
        );

        let mut calls = 0;
        policy
            .execute(&mut conn, |_| {
                calls += 1;
                if calls < 2 {
                    Err(conflict())
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(driver.rollbacks(), 1);
    }
}
