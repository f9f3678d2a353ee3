pub mod column;
pub mod dialect;
pub mod table;
pub mod values;

pub use column::{ColumnDef, ColumnType, ForeignKey, NumericMode, StorageKind};
pub use dialect::Dialect;
pub use table::{table, IndexDef, TableBuilder, TableDef};
pub use values::{Record, Stored, Timestamp, Value};
