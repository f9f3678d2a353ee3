use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::values::{Record, Timestamp, Value};

/// Source of fresh identifiers for generated fields.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Value;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> Value {
        Value::Text(uuid::Uuid::new_v4().to_string())
    }
}

/// `{prefix}-1`, `{prefix}-2`, ... Deterministic, for fixtures and tests.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn next_id(&self) -> Value {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Value::Text(format!("{}-{}", self.prefix, n))
    }
}

/// Everything a generator may look at.
pub struct GenContext<'a> {
    pub field: &'a str,
    pub draft: &'a Record,
    pub existing: &'a [Record],
    pub ids: &'a dyn IdGenerator,
}

pub type GeneratorFn = Arc<dyn Fn(&GenContext<'_>) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct Generator {
    needs_existing: bool,
    generate: GeneratorFn,
}

impl Generator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&GenContext<'_>) -> Value + Send + Sync + 'static,
    {
        Self {
            needs_existing: false,
            generate: Arc::new(f),
        }
    }

    /// A generator that reads the table's current rows; the service loads them on demand.
    pub fn with_existing<F>(f: F) -> Self
    where
        F: Fn(&GenContext<'_>) -> Value + Send + Sync + 'static,
    {
        Self {
            needs_existing: true,
            generate: Arc::new(f),
        }
    }

    pub fn needs_existing(&self) -> bool {
        self.needs_existing
    }

    pub fn generate(&self, ctx: &GenContext<'_>) -> Value {
        (self.generate)(ctx)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("needs_existing", &self.needs_existing)
            .finish_non_exhaustive()
    }
}

/// Fresh id from the table's [`IdGenerator`].
pub fn uuid() -> Generator {
    Generator::new(|ctx| ctx.ids.next_id())
}

/// One more than the largest integer currently stored in the field, starting at 1.
///
/// Past `i64::MAX` the result is a `BigInt`, which integer columns then reject
/// during validation.
pub fn next_integer() -> Generator {
    Generator::with_existing(|ctx| {
        let max = ctx
            .existing
            .iter()
            .filter_map(|r| r.get(ctx.field).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        match max.checked_add(1) {
            Some(next) => Value::Int(next),
            None => Value::BigInt(i128::from(max) + 1),
        }
    })
}

/// Current time, truncated to the millisecond precision timestamps are stored with.
pub fn now() -> Generator {
    Generator::new(|_| {
        Timestamp::now()
            .to_datetime()
            .map(Value::Timestamp)
            .unwrap_or_default()
    })
}
