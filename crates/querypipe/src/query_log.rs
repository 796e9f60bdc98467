//! Statement logging
//!
//! Emits one `info` event per executed statement with its SQL text, the
//! number of bound parameters and a UTC timestamp.

use chrono::{SecondsFormat, Utc};
use querypipe_core::{error::Result, Query};
use tracing::info;

pub fn log_query(query: &Query) {
    info!(
        timestamp = %Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        sql = query.text(),
        params = query.params().len(),
        "Executing query"
    );
}

/// Wrap a query-taking operation so every call logs its query first.
pub fn log_queries<T, F>(operation: F) -> impl Fn(&Query) -> Result<T>
where
    F: Fn(&Query) -> Result<T>,
{
    move |query: &Query| {
        log_query(query);
        operation(query)
    }
}
