use std::fmt;
use std::sync::Arc;

use super::generated::{GenContext, Generator, IdGenerator, UuidGenerator};
use crate::db::column::ForeignKey;
use crate::db::dialect::Dialect;
use crate::db::table::TableDef;
use crate::db::values::{Record, Value};
use crate::error::{Result, StoreError};

pub type CleanupFn = Arc<dyn Fn(&mut Record) + Send + Sync>;
pub type ValidateFn = Arc<dyn Fn(&Record) -> std::result::Result<(), String> + Send + Sync>;
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

#[derive(Clone, Debug)]
pub struct GeneratedField {
    pub field: String,
    pub generator: Generator,
}

/// Read-time only; never written.
#[derive(Clone)]
pub struct ComputedField {
    pub field: String,
    pub compute: ComputeFn,
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// A table definition plus everything the write and read pipelines apply around it.
#[derive(Clone)]
pub struct TableConfig {
    table: TableDef,
    driver: Option<Dialect>,
    cleanup: Option<CleanupFn>,
    validation: Option<ValidateFn>,
    unique_fields: Vec<String>,
    unique_combos: Vec<Vec<String>>,
    generated: Vec<GeneratedField>,
    computed: Vec<ComputedField>,
    foreign_keys: Vec<ForeignKey>,
    ids: Arc<dyn IdGenerator>,
}

impl fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("table", &self.table.name())
            .field("driver", &self.driver)
            .field("unique_fields", &self.unique_fields)
            .field("unique_combos", &self.unique_combos)
            .field("generated", &self.generated)
            .field("computed", &self.computed)
            .field("foreign_keys", &self.foreign_keys)
            .finish_non_exhaustive()
    }
}

impl TableConfig {
    /// Column-level unique flags, composite unique constraints and references
    /// declared on `table` are picked up here.
    pub fn new(table: TableDef) -> Self {
        let unique_fields = table.unique_columns().map(|c| c.name().to_string()).collect();
        let unique_combos = table.unique_sets().map(<[String]>::to_vec).collect();
        let foreign_keys = table.foreign_keys().cloned().collect();
        Self {
            table,
            driver: None,
            cleanup: None,
            validation: None,
            unique_fields,
            unique_combos,
            generated: Vec::new(),
            computed: Vec::new(),
            foreign_keys,
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn driver(mut self, dialect: Dialect) -> Self {
        self.driver = Some(dialect);
        self
    }

    pub fn cleanup_before_save<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        self.cleanup = Some(Arc::new(f));
        self
    }

    pub fn custom_validation<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validation = Some(Arc::new(f));
        self
    }

    pub fn unique_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.unique_fields.contains(&field) {
            self.unique_fields.push(field);
        }
        self
    }

    pub fn unique_combo(mut self, fields: &[&str]) -> Self {
        let combo: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        if !self.unique_combos.contains(&combo) {
            self.unique_combos.push(combo);
        }
        self
    }

    pub fn generated(mut self, field: impl Into<String>, generator: Generator) -> Self {
        self.generated.push(GeneratedField {
            field: field.into(),
            generator,
        });
        self
    }

    pub fn computed<F>(mut self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.computed.push(ComputedField {
            field: field.into(),
            compute: Arc::new(f),
        });
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.retain(|k| k.field != fk.field);
        self.foreign_keys.push(fk);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn table(&self) -> &TableDef {
        &self.table
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.driver
    }

    pub fn primary_key(&self) -> &str {
        self.table.primary_key().name()
    }

    pub fn unique_fields(&self) -> &[String] {
        &self.unique_fields
    }

    pub fn unique_combos(&self) -> &[Vec<String>] {
        &self.unique_combos
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn generated_fields(&self) -> &[GeneratedField] {
        &self.generated
    }

    pub fn computed_fields(&self) -> &[ComputedField] {
        &self.computed
    }

    pub fn is_computed(&self, field: &str) -> bool {
        self.computed.iter().any(|c| c.field == field)
    }

    /// Checks that every declared field exists on the table.
    pub(crate) fn check_fields(&self) -> Result<()> {
        let named = self
            .unique_fields
            .iter()
            .chain(self.unique_combos.iter().flatten())
            .chain(self.generated.iter().map(|g| &g.field))
            .chain(self.foreign_keys.iter().map(|k| &k.field));
        for field in named {
            if !self.table.has_column(field) {
                return Err(StoreError::Schema(format!(
                    "`{}` configures unknown column `{}`",
                    self.name(),
                    field
                )));
            }
        }
        if let Some(c) = self.computed.iter().find(|c| self.table.has_column(&c.field)) {
            return Err(StoreError::Schema(format!(
                "computed field `{}` shadows a column of `{}`",
                c.field,
                self.name()
            )));
        }
        Ok(())
    }

    fn missing<'a>(&'a self, draft: &'a Record) -> impl Iterator<Item = &'a GeneratedField> {
        self.generated
            .iter()
            .filter(move |g| match self.table.column(&g.field) {
                Some(col) => col.is_unset(draft.get(&g.field)),
                None => !draft.contains_key(&g.field),
            })
    }

    /// Whether generating fields for `draft` requires the table's current rows.
    pub fn needs_existing(&self, draft: &Record) -> bool {
        self.missing(draft).any(|g| g.generator.needs_existing())
    }

    pub fn strip_computed(&self, record: &mut Record) {
        for c in &self.computed {
            record.remove(&c.field);
        }
    }

    fn generate(&self, record: &mut Record, existing: &[Record]) {
        let values: Vec<(String, Value)> = self
            .missing(record)
            .map(|g| {
                let ctx = GenContext {
                    field: &g.field,
                    draft: record,
                    existing,
                    ids: self.ids.as_ref(),
                };
                (g.field.clone(), g.generator.generate(&ctx))
            })
            .collect();
        record.extend(values);
    }

    fn check(&self, record: &Record) -> Result<()> {
        self.table.validate(record)?;
        if let Some(validate) = &self.validation {
            validate(record).map_err(|m| StoreError::validation(self.name(), m))?;
        }
        Ok(())
    }

    /// Everything before the uniqueness and reference checks for a new row.
    pub fn prepare_insert(&self, mut draft: Record, existing: &[Record]) -> Result<Record> {
        self.strip_computed(&mut draft);
        if let Some(cleanup) = &self.cleanup {
            cleanup(&mut draft);
        }
        self.generate(&mut draft, existing);
        self.table.apply_defaults(&mut draft);
        self.check(&draft)?;
        Ok(draft)
    }

    /// Same as [`TableConfig::prepare_insert`] for a stored row merged with its changes;
    /// column defaults are not applied.
    pub fn prepare_update(&self, mut merged: Record, existing: &[Record]) -> Result<Record> {
        self.strip_computed(&mut merged);
        if let Some(cleanup) = &self.cleanup {
            cleanup(&mut merged);
        }
        self.generate(&mut merged, existing);
        self.check(&merged)?;
        Ok(merged)
    }

    /// Appends computed fields to a decoded row.
    pub fn materialize(&self, record: &mut Record) {
        let values: Vec<(String, Value)> = self
            .computed
            .iter()
            .map(|c| (c.field.clone(), (c.compute)(record)))
            .collect();
        record.extend(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::column::*;
    use crate::db::table::table;
    use crate::record;
    use crate::schema::generated::{self, SequentialGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn round() -> TableConfig {
        TableConfig::new(
            table("round")
                .col(text("id").primary_key())
                .col(text("course_id").not_null().references("course", "id"))
                .col(smallint("number").not_null())
                .col(text("notes"))
                .col(integer("strokes"))
                .unique(&["course_id", "number"])
                .build()
                .unwrap(),
        )
        .id_generator(SequentialGenerator::new("round"))
        .generated("id", generated::uuid())
        .generated("number", generated::next_integer())
        .computed("over_par", |r| match r.get("strokes").and_then(Value::as_i64) {
            Some(s) => Value::Int(s - 72),
            None => Value::Null,
        })
        .cleanup_before_save(|r| {
            if let Some(Value::Text(n)) = r.get_mut("notes") {
                *n = n.trim().to_string();
            }
        })
    }

    #[test]
    fn test_declarations_from_table() {
        let cfg = round();
        assert_eq!(cfg.primary_key(), "id");
        assert_eq!(cfg.unique_fields(), ["id"]);
        assert_eq!(cfg.unique_combos(), [vec!["course_id".to_string(), "number".to_string()]]);
        assert_eq!(cfg.foreign_keys().len(), 1);
        assert!(cfg.is_computed("over_par"));
        assert!(cfg.check_fields().is_ok());
    }

    #[test]
    fn test_prepare_insert_pipeline() {
        let cfg = round();
        let existing = [record! { "id" => "x", "course_id" => "c1", "number" => 3 }];
        let draft = record! {
            "course_id" => "c1",
            "notes" => "  windy ",
            "strokes" => 80,
            "over_par" => 99,
        };
        assert!(cfg.needs_existing(&draft));
        let out = cfg.prepare_insert(draft, &existing).unwrap();
        assert_eq!(out["id"], Value::from("round-1"));
        assert_eq!(out["number"], Value::Int(4));
        assert_eq!(out["notes"], Value::from("windy"));
        assert!(!out.contains_key("over_par"));

        let mut loaded = out;
        cfg.materialize(&mut loaded);
        assert_eq!(loaded["over_par"], Value::Int(8));
    }

    #[test]
    fn test_generator_skipped_when_supplied() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cfg = TableConfig::new(table("t").col(text("id").primary_key()).build().unwrap())
            .generated(
                "id",
                Generator::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Value::from("generated")
                }),
            );
        let out = cfg.prepare_insert(record! { "id" => "given" }, &[]).unwrap();
        assert_eq!(out["id"], Value::from("given"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!cfg.needs_existing(&record! { "id" => "given" }));

        let out = cfg.prepare_insert(Record::new(), &[]).unwrap();
        assert_eq!(out["id"], Value::from("generated"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_null_skips_nullable_generator() {
        let cfg = TableConfig::new(
            table("t")
                .col(text("id").primary_key())
                .col(text("tag"))
                .build()
                .unwrap(),
        )
        .id_generator(SequentialGenerator::new("t"))
        .generated("id", generated::uuid())
        .generated("tag", Generator::new(|_| Value::from("auto")));

        let out = cfg
            .prepare_insert(record! { "id" => Value::Null, "tag" => Value::Null }, &[])
            .unwrap();
        assert_eq!(out["id"], Value::from("t-1"));
        assert_eq!(out["tag"], Value::Null);

        let out = cfg.prepare_insert(Record::new(), &[]).unwrap();
        assert_eq!(out["tag"], Value::from("auto"));
    }

    #[test]
    fn test_custom_validation() {
        let cfg = round().custom_validation(|r| match r.get("strokes").and_then(Value::as_i64) {
            Some(s) if s < 18 => Err(format!("{} strokes is not a round", s)),
            _ => Ok(()),
        });
        let err = cfg
            .prepare_insert(record! { "course_id" => "c1", "strokes" => 10 }, &[])
            .unwrap_err();
        assert!(err.is_validation(), "{err}");
        assert!(err.to_string().contains("not a round"));
    }

    #[test]
    fn test_unknown_configured_field() {
        let cfg = round().unique_field("nope");
        assert!(matches!(cfg.check_fields(), Err(StoreError::Schema(_))));
        let cfg = round().computed("strokes", |_| Value::Null);
        assert!(cfg.check_fields().is_err());
    }
}
