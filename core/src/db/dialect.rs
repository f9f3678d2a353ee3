use sea_orm::sea_query::{
    self, Alias, Expr, PostgresQueryBuilder, SimpleExpr, SqliteQueryBuilder,
};
use sea_orm::DatabaseBackend;
use serde::{Deserialize, Serialize};

use super::column::{ColumnType, NumericMode, StorageKind};
use super::values::Stored;
use crate::error::{Result, StoreError};

/// SQL engine family a table is rendered for.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn backend(self) -> DatabaseBackend {
        match self {
            Dialect::Sqlite => DatabaseBackend::Sqlite,
            Dialect::Postgres => DatabaseBackend::Postgres,
        }
    }

    pub fn from_backend(backend: DatabaseBackend) -> Result<Self> {
        match backend {
            DatabaseBackend::Sqlite => Ok(Dialect::Sqlite),
            DatabaseBackend::Postgres => Ok(Dialect::Postgres),
            other => Err(StoreError::Unsupported(format!("backend {:?}", other))),
        }
    }

    pub fn native_type(self, ty: ColumnType) -> String {
        let name = match (self, ty) {
            (_, ColumnType::Text) => "text",
            (_, ColumnType::Varchar(len)) => return format!("varchar({})", len),
            (_, ColumnType::Integer) => "integer",
            (_, ColumnType::SmallInt) => "smallint",
            (_, ColumnType::BigInt) => "bigint",
            (_, ColumnType::Real) => "real",
            (_, ColumnType::Double) => "double precision",
            (Dialect::Sqlite, ColumnType::Numeric(_)) => "text",
            (Dialect::Postgres, ColumnType::Numeric(_)) => "numeric",
            (_, ColumnType::Boolean) => "boolean",
            (_, ColumnType::Timestamp) => "bigint",
            (Dialect::Sqlite, ColumnType::Time | ColumnType::Date) => "text",
            (Dialect::Postgres, ColumnType::Time) => "time",
            (Dialect::Postgres, ColumnType::Date) => "date",
            (Dialect::Sqlite, ColumnType::Json | ColumnType::Jsonb) => "text",
            (Dialect::Postgres, ColumnType::Json) => "json",
            (Dialect::Postgres, ColumnType::Jsonb) => "jsonb",
            (Dialect::Sqlite, ColumnType::Blob) => "blob",
            (Dialect::Postgres, ColumnType::Blob) => "bytea",
        };
        name.to_string()
    }

    /// Postgres types that do not accept a text parameter without a cast.
    fn text_cast(self, ty: ColumnType) -> Option<&'static str> {
        match (self, ty) {
            (Dialect::Sqlite, _) => None,
            (Dialect::Postgres, ColumnType::Numeric(_)) => Some("numeric"),
            (Dialect::Postgres, ColumnType::Json) => Some("json"),
            (Dialect::Postgres, ColumnType::Jsonb) => Some("jsonb"),
            (Dialect::Postgres, ColumnType::Date) => Some("date"),
            (Dialect::Postgres, ColumnType::Time) => Some("time"),
            (Dialect::Postgres, _) => None,
        }
    }

    /// Expression binding a stored value into a column of type `ty`.
    pub fn bind(self, ty: ColumnType, stored: Stored) -> SimpleExpr {
        let value = stored_to_query_value(ty.storage_kind(), stored);
        match self.text_cast(ty) {
            Some(cast) => Expr::val(value).cast_as(Alias::new(cast)),
            None => Expr::value(value),
        }
    }

    /// Expression selecting a column so that it decodes as its storage kind.
    pub fn read(self, ty: ColumnType, column: &str) -> SimpleExpr {
        let col = Expr::col(Alias::new(column));
        match (self, ty) {
            (Dialect::Sqlite, _) => col.into(),
            (Dialect::Postgres, ColumnType::Integer | ColumnType::SmallInt) => {
                col.cast_as(Alias::new("bigint"))
            }
            (Dialect::Postgres, ColumnType::Real) => col.cast_as(Alias::new("double precision")),
            (Dialect::Postgres, t) if self.text_cast(t).is_some() => {
                col.cast_as(Alias::new("text"))
            }
            (Dialect::Postgres, _) => col.into(),
        }
    }

    /// Left-hand side of a filter comparison against a bound stored value.
    pub fn filter_operand(self, ty: ColumnType, column: &str) -> SimpleExpr {
        match (self, ty) {
            (
                Dialect::Sqlite,
                ColumnType::Numeric(NumericMode::ScaledNumber { .. } | NumericMode::ScaledBigInt),
            ) => Expr::col(Alias::new(column)).cast_as(Alias::new("integer")),
            (
                Dialect::Postgres,
                ColumnType::Numeric(NumericMode::ScaledNumber { .. } | NumericMode::ScaledBigInt),
            ) => Expr::col(Alias::new(column)).into(),
            _ => self.read(ty, column),
        }
    }

    /// Right-hand side matching [`Dialect::filter_operand`].
    pub fn filter_value(self, ty: ColumnType, stored: Stored) -> SimpleExpr {
        match (self, ty, stored) {
            (
                Dialect::Sqlite,
                ColumnType::Numeric(NumericMode::ScaledNumber { .. } | NumericMode::ScaledBigInt),
                Stored::Text(t),
            ) => match t.parse::<i64>() {
                Ok(i) => Expr::value(i),
                Err(_) => Expr::value(t),
            },
            (
                Dialect::Postgres,
                ColumnType::Numeric(NumericMode::ScaledNumber { .. } | NumericMode::ScaledBigInt),
                stored,
            ) => self.bind(ty, stored),
            (_, ty, stored) => Expr::value(stored_to_query_value(ty.storage_kind(), stored)),
        }
    }

    /// Name of the function returning the 1-based position of a substring, 0 if absent.
    pub fn position_fn(self) -> &'static str {
        match self {
            Dialect::Sqlite => "instr",
            Dialect::Postgres => "strpos",
        }
    }

    pub fn length_fn(self) -> &'static str {
        match self {
            Dialect::Sqlite => "length",
            Dialect::Postgres => "char_length",
        }
    }

    pub fn build_table(self, stmt: &sea_query::TableCreateStatement) -> String {
        match self {
            Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
            Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
        }
    }

    pub fn build_index(self, stmt: &sea_query::IndexCreateStatement) -> String {
        match self {
            Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
            Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
        }
    }
}

/// Typed query value; nulls keep the storage kind so binders pick the right type.
pub fn stored_to_query_value(kind: StorageKind, stored: Stored) -> sea_query::Value {
    use sea_query::Value as Q;
    match stored {
        Stored::Null => match kind {
            StorageKind::Integer => Q::BigInt(None),
            StorageKind::Float => Q::Double(None),
            StorageKind::Text => Q::String(None),
            StorageKind::Bool => Q::Bool(None),
            StorageKind::Blob => Q::Bytes(None),
        },
        Stored::Int(i) => i.into(),
        Stored::Real(f) => f.into(),
        Stored::Text(s) => s.into(),
        Stored::Bool(b) => b.into(),
        Stored::Blob(b) => b.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_native_types() {
        assert_eq!(Dialect::Sqlite.native_type(ColumnType::Timestamp), "bigint");
        assert_eq!(Dialect::Postgres.native_type(ColumnType::Jsonb), "jsonb");
        assert_eq!(Dialect::Sqlite.native_type(ColumnType::Jsonb), "text");
        assert_eq!(Dialect::Postgres.native_type(ColumnType::Blob), "bytea");
        assert_eq!(Dialect::Sqlite.native_type(ColumnType::Varchar(12)), "varchar(12)");
        assert_eq!(
            Dialect::Postgres.native_type(ColumnType::Numeric(NumericMode::Exact)),
            "numeric"
        );
    }

    #[test]
    fn test_dialect_names() {
        assert_eq!(Dialect::from_str("postgres").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::Sqlite.to_string(), "sqlite");
        assert_eq!(
            Dialect::from_backend(DatabaseBackend::Sqlite).unwrap(),
            Dialect::Sqlite
        );
        assert!(Dialect::from_backend(DatabaseBackend::MySql).is_err());
    }

    #[test]
    fn test_postgres_casts_text_parameters() {
        let expr = Dialect::Postgres.bind(
            ColumnType::Numeric(NumericMode::Exact),
            Stored::Text("1.5".into()),
        );
        let sql = sea_query::Query::select()
            .expr(expr)
            .to_string(PostgresQueryBuilder);
        assert!(sql.contains("CAST('1.5' AS numeric)"), "{sql}");

        let expr = Dialect::Sqlite.bind(
            ColumnType::Numeric(NumericMode::Exact),
            Stored::Text("1.5".into()),
        );
        let sql = sea_query::Query::select()
            .expr(expr)
            .to_string(SqliteQueryBuilder);
        assert!(!sql.contains("CAST"), "{sql}");
    }
}
