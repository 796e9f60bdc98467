//! Commit-or-rollback around a unit of work
//!
//! The unit of work runs on a handle opened by the enclosing
//! [`ConnectionScope`](crate::ConnectionScope); the same handle is committed
//! or rolled back. Any error from the unit of work rolls the transaction back
//! and is returned unmodified.
//!
//! # Example
//!
//! ```no_run
//! use querypipe::prelude::*;
//! use querypipe::transaction;
//!
//! # fn main() -> Result<()> {
//! let scope = ConnectionScope::new(SqliteConnector::new(StoreConfig::new("./users.db")));
//! scope.run(|handle| {
//!     transaction::run(handle, |txn| {
//!         txn.execute(&Query::new("INSERT INTO users (name, age) VALUES (?, ?)").bind("Eve").bind(28))?;
//!         txn.execute(&Query::new("UPDATE users SET age = age + 1 WHERE name = ?").bind("Bob"))?;
//!         Ok(())
//!     })
//! })?;
//! # Ok(())
//! # }
//! ```

use querypipe_core::{
    error::{PipelineError, Result},
    observe,
    traits::StoreHandle,
    TransactionOutcome,
};
use std::time::Instant;
use tracing::{error, info, warn};

/// Run `work` inside a transaction on `handle` and report how it ended.
pub fn run_outcome<H, T, F>(handle: &mut H, work: F) -> TransactionOutcome<T>
where
    H: StoreHandle,
    F: FnOnce(&mut H) -> Result<T>,
{
    if let Err(e) = handle.begin() {
        return TransactionOutcome::RolledBack(e);
    }
    let started = Instant::now();

    let outcome = match work(handle) {
        Ok(value) => match handle.commit() {
            Ok(()) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Transaction committed");
                TransactionOutcome::Committed(value)
            }
            Err(commit_err) => {
                warn!(error = %commit_err, "Commit failed, rolling back");
                roll_back(handle, &commit_err);
                TransactionOutcome::RolledBack(commit_err)
            }
        },
        Err(e) => {
            warn!(error = %e, "Unit of work failed, rolling back");
            roll_back(handle, &e);
            TransactionOutcome::RolledBack(e)
        }
    };

    observe::record_transaction(started.elapsed(), outcome.is_committed());
    outcome
}

// The original failure is what the caller sees; a failed rollback is only logged.
fn roll_back<H: StoreHandle>(handle: &mut H, cause: &PipelineError) {
    if let Err(rollback_err) = handle.rollback() {
        error!(
            error = %rollback_err,
            cause = %cause,
            "Rollback failed"
        );
    }
}

/// Run `work` inside a transaction on `handle`.
pub fn run<H, T, F>(handle: &mut H, work: F) -> Result<T>
where
    H: StoreHandle,
    F: FnOnce(&mut H) -> Result<T>,
{
    run_outcome(handle, work).into_result()
}

/// Turn a handle-taking unit of work into its transactional counterpart.
pub fn wrap<H, T, F>(work: F) -> impl Fn(&mut H) -> Result<T>
where
    H: StoreHandle,
    F: Fn(&mut H) -> Result<T>,
{
    move |handle: &mut H| run(handle, &work)
}
