use querypipe_core::PipelineError;
use rusqlite::ErrorCode;

fn code_name(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::DatabaseBusy => "SQLITE_BUSY",
        ErrorCode::DatabaseLocked => "SQLITE_LOCKED",
        ErrorCode::ConstraintViolation => "SQLITE_CONSTRAINT",
        ErrorCode::CannotOpen => "SQLITE_CANTOPEN",
        ErrorCode::NotADatabase => "SQLITE_NOTADB",
        ErrorCode::PermissionDenied => "SQLITE_PERM",
        ErrorCode::AuthorizationForStatementDenied => "SQLITE_AUTH",
        _ => "SQLITE_ERROR",
    }
}

/// Primary result code of a SQLite failure, if the error carries one.
pub fn error_code(err: &rusqlite::Error) -> Option<ErrorCode> {
    match err {
        rusqlite::Error::SqliteFailure(ffi, _) => Some(ffi.code),
        _ => None,
    }
}

/// Whether the error is lock contention that may clear up on its own.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        error_code(err),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Map a statement-level SQLite failure onto the pipeline error taxonomy.
///
/// `SQLITE_BUSY` and `SQLITE_LOCKED` are transient, `SQLITE_CONSTRAINT` is an
/// integrity error, everything else is a permanent query error.
pub fn classify(err: rusqlite::Error) -> PipelineError {
    match error_code(&err) {
        Some(code @ (ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)) => {
            PipelineError::transient(code_name(code), err.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => PipelineError::Integrity(err.to_string()),
        _ => PipelineError::Query(err.to_string()),
    }
}

/// Map a failure raised while opening a handle.
///
/// The store refusing a handle is a connection error and is never retried.
pub fn classify_open(err: rusqlite::Error) -> PipelineError {
    match error_code(&err) {
        Some(
            code @ (ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied),
        ) => PipelineError::Connection(format!("{}: {}", code_name(code), err)),
        _ => classify(err),
    }
}
