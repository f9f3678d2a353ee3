pub mod config;
pub mod generated;
pub mod registry;

pub use config::{ComputedField, GeneratedField, TableConfig};
pub use generated::{GenContext, Generator, IdGenerator, SequentialGenerator, UuidGenerator};
pub use registry::Schema;
