use crate::error::{PipelineError, Result};

/// Result of running a unit of work inside a transaction.
#[derive(Debug)]
pub enum TransactionOutcome<T> {
    /// The unit of work returned normally and its writes are durable.
    Committed(T),
    /// The unit of work (or the commit) failed; nothing it wrote survived.
    RolledBack(PipelineError),
}

impl<T> TransactionOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed(_))
    }

    /// Collapse into a `Result`, handing back the original error untouched.
    pub fn into_result(self) -> Result<T> {
        match self {
            TransactionOutcome::Committed(value) => Ok(value),
            TransactionOutcome::RolledBack(err) => Err(err),
        }
    }
}
