pub mod connector;

pub use connector::{Connector, RowCursor, StoreHandle};
