pub mod collection;
pub mod condition;
pub mod eval;

pub use collection::{count_where, filter_entities, find_first, find_where, match_exists, FindOptions};
pub use condition::{CompositeKind, Condition, Operator};
pub use eval::{evaluate, leaf, matches, Fields};
