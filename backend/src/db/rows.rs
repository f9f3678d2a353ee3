use sea_orm::sea_query::{Alias, Expr, Func, Order, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, QueryResult, Statement};

use caddie_core::db::{ColumnDef, Dialect, StorageKind, Stored, TableDef};
use caddie_core::schema::TableConfig;
use caddie_core::{Record, Result, StoreError, Value};

/// Row window and ordering for a select.
#[derive(Debug, Clone, Default)]
pub struct Window {
    pub offset: u64,
    pub limit: Option<u64>,
    pub order: Option<(String, Order)>,
}

/// Rejects a table pinned to a different dialect than the connection.
pub fn check_driver(cfg: &TableConfig, dialect: Dialect) -> Result<()> {
    match cfg.dialect() {
        Some(d) if d != dialect => Err(StoreError::Schema(format!(
            "`{}` is declared for {}, connection is {}",
            cfg.name(),
            d,
            dialect
        ))),
        _ => Ok(()),
    }
}

pub async fn create_table<C: ConnectionTrait>(conn: &C, dialect: Dialect, table: &TableDef) -> Result<()> {
    for sql in table.to_sql(dialect) {
        log::trace!(target: "caddie::sql", "{}", sql);
        conn.execute_unprepared(&sql).await?;
    }
    Ok(())
}

pub async fn table_names<C: ConnectionTrait>(conn: &C, dialect: Dialect) -> Result<Vec<String>> {
    let sql = match dialect {
        Dialect::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        }
        Dialect::Postgres => {
            "SELECT CAST(table_name AS text) AS name FROM information_schema.tables \
             WHERE table_schema = current_schema() ORDER BY table_name"
        }
    };
    let rows = conn
        .query_all(Statement::from_string(dialect.backend(), sql))
        .await?;
    rows.iter()
        .map(|r| r.try_get::<String>("", "name").map_err(StoreError::from))
        .collect()
}

fn decode(row: &QueryResult, col: &ColumnDef) -> Result<Value> {
    let name = col.name();
    let stored = match col.column_type().storage_kind() {
        StorageKind::Integer => row.try_get::<Option<i64>>("", name)?.map(Stored::Int),
        StorageKind::Float => row.try_get::<Option<f64>>("", name)?.map(Stored::Real),
        StorageKind::Text => row.try_get::<Option<String>>("", name)?.map(Stored::Text),
        StorageKind::Bool => row.try_get::<Option<bool>>("", name)?.map(Stored::Bool),
        StorageKind::Blob => row.try_get::<Option<Vec<u8>>>("", name)?.map(Stored::Blob),
    };
    Ok(col.load(stored.unwrap_or(Stored::Null))?)
}

/// Decoded rows, without computed fields. Ordered by primary key unless `window` says otherwise.
pub async fn select<C: ConnectionTrait>(
    conn: &C,
    dialect: Dialect,
    table: &TableDef,
    cond: Option<SimpleExpr>,
    window: &Window,
) -> Result<Vec<Record>> {
    let mut stmt = Query::select();
    for c in table.columns() {
        stmt.expr_as(dialect.read(c.column_type(), c.name()), Alias::new(c.name()));
    }
    stmt.from(Alias::new(table.name()));
    if let Some(cond) = cond {
        stmt.and_where(cond);
    }
    if let Some((field, order)) = &window.order {
        let col = table
            .column(field)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: table.name().to_string(),
                column: field.clone(),
            })?;
        stmt.order_by_expr(dialect.filter_operand(col.column_type(), col.name()), order.clone());
    }
    stmt.order_by(Alias::new(table.primary_key().name()), Order::Asc);
    match (window.limit, window.offset) {
        (Some(limit), offset) => {
            stmt.limit(limit).offset(offset);
        }
        (None, 0) => {}
        (None, offset) => {
            stmt.limit(i64::MAX as u64).offset(offset);
        }
    }

    let rows = conn.query_all(dialect.backend().build(&stmt)).await?;
    rows.iter()
        .map(|row| {
            table
                .columns()
                .iter()
                .map(|c| Ok((c.name().to_string(), decode(row, c)?)))
                .collect()
        })
        .collect()
}

pub async fn count<C: ConnectionTrait>(
    conn: &C,
    dialect: Dialect,
    table: &TableDef,
    cond: Option<SimpleExpr>,
) -> Result<u64> {
    let mut stmt = Query::select();
    stmt.expr_as(Func::count(Expr::cust("*")), Alias::new("n"))
        .from(Alias::new(table.name()));
    if let Some(cond) = cond {
        stmt.and_where(cond);
    }
    let row = conn.query_one(dialect.backend().build(&stmt)).await?;
    let n = match row {
        Some(row) => row.try_get::<i64>("", "n")?,
        None => 0,
    };
    Ok(n.max(0) as u64)
}

fn bound(dialect: Dialect, table: &TableDef, field: &str, value: Value) -> Result<(Alias, SimpleExpr)> {
    let col = table.column(field).ok_or_else(|| StoreError::UnknownColumn {
        table: table.name().to_string(),
        column: field.to_string(),
    })?;
    let stored = col
        .save(value)
        .map_err(|e| StoreError::validation(table.name(), e.to_string()))?;
    Ok((Alias::new(field), dialect.bind(col.column_type(), stored)))
}

/// Matches rows whose primary key is one of `keys`, compared in stored form.
pub fn key_filter(dialect: Dialect, table: &TableDef, keys: Vec<Value>) -> Result<SimpleExpr> {
    let pk = table.primary_key().name();
    let bound = keys
        .into_iter()
        .map(|k| bound(dialect, table, pk, k).map(|(_, expr)| expr))
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::col(Alias::new(pk)).is_in(bound))
}

pub async fn insert<C: ConnectionTrait>(
    conn: &C,
    dialect: Dialect,
    table: &TableDef,
    record: &Record,
) -> Result<()> {
    let (columns, values): (Vec<Alias>, Vec<SimpleExpr>) = record
        .iter()
        .map(|(k, v)| bound(dialect, table, k, v.clone()))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table.name())).columns(columns);
    stmt.values(values)?;
    conn.execute(dialect.backend().build(&stmt)).await?;
    Ok(())
}

pub async fn update<C: ConnectionTrait>(
    conn: &C,
    dialect: Dialect,
    table: &TableDef,
    cond: SimpleExpr,
    changes: &Record,
) -> Result<u64> {
    if changes.is_empty() {
        return Ok(0);
    }
    let values = changes
        .iter()
        .map(|(k, v)| bound(dialect, table, k, v.clone()))
        .collect::<Result<Vec<_>>>()?;
    let mut stmt = Query::update();
    stmt.table(Alias::new(table.name()))
        .values(values)
        .and_where(cond);
    let res = conn.execute(dialect.backend().build(&stmt)).await?;
    Ok(res.rows_affected())
}

pub async fn delete<C: ConnectionTrait>(
    conn: &C,
    dialect: Dialect,
    table: &TableDef,
    cond: SimpleExpr,
) -> Result<u64> {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(table.name())).and_where(cond);
    let res = conn.execute(dialect.backend().build(&stmt)).await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddie_core::db::column::*;
    use caddie_core::db::table;
    use caddie_core::db::NumericMode;
    use caddie_core::record;
    use chrono::{TimeZone, Utc};
    use sea_orm::{ConnectOptions, DatabaseConnection};

    async fn sqlite(dir: &tempfile::TempDir) -> DatabaseConnection {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("rows.db").display());
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(1).sqlx_logging(false);
        sea_orm::Database::connect(opt).await.unwrap()
    }

    fn score() -> TableDef {
        table("score")
            .col(text("id").primary_key())
            .col(smallint("hole").not_null())
            .col(real("gir"))
            .col(numeric("handicap").mode(NumericMode::ScaledNumber { scale: 1 }))
            .col(boolean("putt_holed"))
            .col(timestamp("at"))
            .col(json("meta"))
            .col(blob("sketch"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_every_storage_kind() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite(&dir).await;
        let t = score();
        create_table(&conn, Dialect::Sqlite, &t).await.unwrap();
        // idempotent
        create_table(&conn, Dialect::Sqlite, &t).await.unwrap();

        let at = Utc.timestamp_millis_opt(1_714_557_600_250).unwrap();
        let row = record! {
            "id" => "s1",
            "hole" => 7,
            "gir" => 0.5,
            "handicap" => 12.5,
            "putt_holed" => true,
            "at" => at,
            "meta" => Value::Json(serde_json::json!({ "wind": "NE" })),
            "sketch" => vec![0u8, 255],
        };
        insert(&conn, Dialect::Sqlite, &t, &row).await.unwrap();
        insert(&conn, Dialect::Sqlite, &t, &record! { "id" => "s0", "hole" => 1 })
            .await
            .unwrap();

        let rows = select(&conn, Dialect::Sqlite, &t, None, &Window::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], Value::from("s0"));
        assert_eq!(rows[0]["gir"], Value::Null);
        assert_eq!(rows[1], row);

        assert_eq!(count(&conn, Dialect::Sqlite, &t, None).await.unwrap(), 2);
        assert_eq!(
            table_names(&conn, Dialect::Sqlite).await.unwrap(),
            vec!["score".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_delete_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite(&dir).await;
        let t = score();
        create_table(&conn, Dialect::Sqlite, &t).await.unwrap();
        for hole in 1..=5 {
            let id = format!("s{}", hole);
            insert(&conn, Dialect::Sqlite, &t, &record! { "id" => id, "hole" => hole })
                .await
                .unwrap();
        }

        let s3 = Expr::col(Alias::new("id")).eq("s3");
        let n = update(&conn, Dialect::Sqlite, &t, s3.clone(), &record! { "hole" => 30 })
            .await
            .unwrap();
        assert_eq!(n, 1);

        let window = Window {
            offset: 1,
            limit: Some(2),
            order: Some(("hole".to_string(), Order::Desc)),
        };
        let rows = select(&conn, Dialect::Sqlite, &t, None, &window).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![Value::from("s5"), Value::from("s4")]);

        let window = Window {
            offset: 3,
            ..Default::default()
        };
        assert_eq!(select(&conn, Dialect::Sqlite, &t, None, &window).await.unwrap().len(), 2);

        assert_eq!(delete(&conn, Dialect::Sqlite, &t, s3).await.unwrap(), 1);
        assert_eq!(count(&conn, Dialect::Sqlite, &t, None).await.unwrap(), 4);

        let err = insert(&conn, Dialect::Sqlite, &t, &record! { "id" => "x", "nope" => 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }), "{err}");
    }

    #[test]
    fn test_driver_mismatch() {
        let cfg = TableConfig::new(score()).driver(Dialect::Postgres);
        assert!(check_driver(&cfg, Dialect::Sqlite).is_err());
        assert!(check_driver(&cfg, Dialect::Postgres).is_ok());
        assert!(check_driver(&TableConfig::new(score()), Dialect::Sqlite).is_ok());
    }
}
