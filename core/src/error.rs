use thiserror::Error;

/// A value that does not fit the column it is written to or read from.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("column `{column}`: {message}")]
pub struct ColumnError {
    pub column: String,
    pub message: String,
}

impl ColumnError {
    pub fn new(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed on `{table}`: {message}")]
    Validation { table: String, message: String },
    #[error("constraint violation on `{table}`: {message}")]
    Constraint { table: String, message: String },
    #[error("backend init failed: {0}")]
    BackendInit(String),
    #[error("persist failed: {0}")]
    Persist(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Unknown column `{column}` in `{table}`")]
    UnknownColumn { table: String, column: String },
    #[error("`{table}` has no row with key {key}")]
    NotFound { table: String, key: String },
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("decode error: {0}")]
    Decode(#[from] ColumnError),
    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("Query error: {0}")]
    Query(#[from] sea_orm::sea_query::error::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Constraint {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
