pub mod cursor;
pub mod outcome;
pub mod query;
pub mod row;
pub mod value;

pub use cursor::PageCursor;
pub use outcome::TransactionOutcome;
pub use query::{Fingerprint, Placeholders, Query};
pub use row::Row;
pub use value::Value;
