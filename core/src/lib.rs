pub mod db;
pub mod error;
pub mod filter;
pub mod schema;

pub use db::{Record, Stored, Value};
pub use error::{ColumnError, Result, StoreError};
