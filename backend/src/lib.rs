pub mod db;

pub use caddie_core::{Record, Result, StoreError, Value};
