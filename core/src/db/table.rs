use sea_orm::sea_query::{self, Alias, Index, Table};
use std::collections::HashSet;

use super::column::{ColumnDef, ColumnDefault, ColumnType, ForeignKey, NumericMode, MAX_SCALE};
use super::dialect::Dialect;
use super::values::{Record, Value};
use crate::error::{Result, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Immutable table declaration: ordered columns plus composite constraints.
#[derive(Clone, Debug)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: usize,
    indexes: Vec<IndexDef>,
}

pub struct TableBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    indexes: Vec<(Vec<String>, bool)>,
}

pub fn table(name: impl Into<String>) -> TableBuilder {
    TableBuilder {
        name: name.into(),
        columns: Vec::new(),
        indexes: Vec::new(),
    }
}

fn index_name(table: &str, columns: &[String], unique: bool) -> String {
    format!(
        "{}_{}_{}",
        table,
        columns.join("_"),
        if unique { "key" } else { "idx" }
    )
}

impl TableBuilder {
    pub fn col(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Composite unique constraint.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.indexes
            .push((columns.iter().map(|c| c.to_string()).collect(), true));
        self
    }

    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes
            .push((columns.iter().map(|c| c.to_string()).collect(), false));
        self
    }

    pub fn build(self) -> Result<TableDef> {
        let mut seen = HashSet::new();
        for c in &self.columns {
            if !seen.insert(c.name()) {
                return Err(StoreError::Schema(format!(
                    "duplicate column `{}` in `{}`",
                    c.name(),
                    self.name
                )));
            }
            if let ColumnType::Numeric(NumericMode::ScaledNumber { scale }) = c.column_type() {
                if scale > MAX_SCALE {
                    return Err(StoreError::Schema(format!(
                        "`{}.{}` scale {} exceeds {}",
                        self.name,
                        c.name(),
                        scale,
                        MAX_SCALE
                    )));
                }
            }
        }

        let pks: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key())
            .map(|(i, _)| i)
            .collect();
        let primary_key = match pks.as_slice() {
            [pk] => *pk,
            [] => {
                return Err(StoreError::Schema(format!(
                    "`{}` has no primary key",
                    self.name
                )))
            }
            _ => {
                return Err(StoreError::Schema(format!(
                    "`{}` declares more than one primary key",
                    self.name
                )))
            }
        };

        let mut indexes = Vec::with_capacity(self.indexes.len());
        for (columns, unique) in self.indexes {
            if columns.is_empty() {
                return Err(StoreError::Schema(format!(
                    "empty index on `{}`",
                    self.name
                )));
            }
            if let Some(missing) = columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(StoreError::Schema(format!(
                    "index on `{}` names unknown column `{}`",
                    self.name, missing
                )));
            }
            indexes.push(IndexDef {
                name: index_name(&self.name, &columns, unique),
                columns,
                unique,
            });
        }

        Ok(TableDef {
            name: self.name,
            columns: self.columns,
            primary_key,
            indexes,
        })
    }
}

impl TableDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> &ColumnDef {
        &self.columns[self.primary_key]
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Single columns declared unique, primary key included.
    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_unique())
    }

    /// Composite unique constraints.
    pub fn unique_sets(&self) -> impl Iterator<Item = &[String]> {
        self.indexes
            .iter()
            .filter(|i| i.unique)
            .map(|i| i.columns.as_slice())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.columns.iter().filter_map(|c| c.foreign_key())
    }

    /// Fill absent fields from column defaults. An explicit null counts as
    /// absent only where the column cannot hold it.
    pub fn apply_defaults(&self, record: &mut Record) {
        for c in &self.columns {
            if let Some(default) = c.default_value() {
                if c.is_unset(record.get(c.name())) {
                    record.insert(c.name().to_string(), default.produce());
                }
            }
        }
    }

    /// Schema validation: unknown fields, nullability and type conformity.
    pub fn validate(&self, record: &Record) -> Result<()> {
        if let Some(unknown) = record.keys().find(|k| !self.has_column(k)) {
            return Err(StoreError::validation(
                &self.name,
                format!("unknown field `{}`", unknown),
            ));
        }
        for c in &self.columns {
            let v = record.get(c.name()).unwrap_or(&Value::Null);
            c.validate(v)
                .map_err(|e| StoreError::validation(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    pub fn create_table_statement(&self, dialect: Dialect) -> sea_query::TableCreateStatement {
        let mut stmt = Table::create();
        stmt.table(Alias::new(&self.name)).if_not_exists();
        for c in &self.columns {
            let mut def = sea_query::ColumnDef::new(Alias::new(c.name()));
            def.custom(Alias::new(dialect.native_type(c.column_type())));
            if c.is_not_null() {
                def.not_null();
            }
            if c.is_primary_key() {
                def.primary_key();
            } else if c.is_unique() {
                def.unique_key();
            }
            if let Some(ColumnDefault::Value(v)) = c.default_value() {
                if let Ok(stored) = c.save(v.clone()) {
                    def.default(dialect.bind(c.column_type(), stored));
                }
            }
            stmt.col(&mut def);
        }
        stmt
    }

    pub fn create_index_statements(&self) -> Vec<sea_query::IndexCreateStatement> {
        self.indexes
            .iter()
            .map(|i| {
                let mut stmt = Index::create();
                stmt.name(&i.name)
                    .table(Alias::new(&self.name))
                    .if_not_exists();
                for c in &i.columns {
                    stmt.col(Alias::new(c));
                }
                if i.unique {
                    stmt.unique();
                }
                stmt
            })
            .collect()
    }

    /// Every DDL statement for this table, rendered for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> Vec<String> {
        let mut out = vec![dialect.build_table(&self.create_table_statement(dialect))];
        out.extend(
            self.create_index_statements()
                .iter()
                .map(|i| dialect.build_index(i)),
        );
        out
    }
}
