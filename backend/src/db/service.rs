use sea_orm::sea_query::Order;
use sea_orm::{ConnectionTrait, TransactionTrait};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use caddie_core::filter::{evaluate, Condition, FindOptions};
use caddie_core::schema::{Schema, TableConfig};
use caddie_core::{Record, Result, StoreError, Value};

use super::connection::Database;
use super::filter;
use super::rows::{self, Window};

/// Reads and writes one table of a [`Schema`] through the full pipeline:
/// generated fields, defaults, validation, uniqueness, references and cascades.
#[derive(Clone)]
pub struct TableService {
    db: Database,
    schema: Arc<Schema>,
    config: Arc<TableConfig>,
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// Fields of `next` whose value differs from `current`.
fn changed_fields(current: &Record, next: &Record) -> Record {
    next.iter()
        .filter(|(k, v)| current.get(*k).unwrap_or(&Value::Null) != *v)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn fill_nulls(cfg: &TableConfig, row: &mut Record) {
    for c in cfg.table().columns() {
        row.entry(c.name().to_string()).or_insert(Value::Null);
    }
}

impl TableService {
    pub fn new(db: Database, schema: Arc<Schema>, table: &str) -> Result<Self> {
        let config = schema.table(table)?.clone();
        rows::check_driver(&config, db.dialect())?;
        Ok(Self { db, schema, config })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn key_condition(&self, key: Value) -> Condition {
        Condition::eq(self.config.primary_key(), key)
    }

    // reads

    pub async fn find_all(&self, filter: Option<&Condition>) -> Result<Vec<Record>> {
        self.select_in(self.db.conn(), &self.config, filter, &Window::default())
            .await
    }

    pub async fn find_where(&self, options: &FindOptions) -> Result<Vec<Record>> {
        let window = Window {
            offset: options.offset as u64,
            limit: options.limit.map(|l| l as u64),
            order: None,
        };
        self.select_in(self.db.conn(), &self.config, options.filter.as_ref(), &window)
            .await
    }

    /// [`TableService::find_where`] sorted on `field`, primary key breaking ties.
    pub async fn find_where_ordered(
        &self,
        options: &FindOptions,
        field: &str,
        order: Order,
    ) -> Result<Vec<Record>> {
        let window = Window {
            offset: options.offset as u64,
            limit: options.limit.map(|l| l as u64),
            order: Some((field.to_string(), order)),
        };
        self.select_in(self.db.conn(), &self.config, options.filter.as_ref(), &window)
            .await
    }

    pub async fn find_by_id(&self, key: impl Into<Value>) -> Result<Option<Record>> {
        self.find_first(Some(&self.key_condition(key.into()))).await
    }

    pub async fn find_first(&self, filter: Option<&Condition>) -> Result<Option<Record>> {
        let window = Window {
            limit: Some(1),
            ..Default::default()
        };
        let rows = self
            .select_in(self.db.conn(), &self.config, filter, &window)
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn count(&self, filter: Option<&Condition>) -> Result<u64> {
        self.count_in(self.db.conn(), &self.config, filter).await
    }

    pub async fn exists(&self, filter: Option<&Condition>) -> Result<bool> {
        Ok(self.find_first(filter).await?.is_some())
    }

    // writes

    pub async fn insert(&self, draft: Record) -> Result<Record> {
        self.db.autosaved(self.insert_txn(draft)).await
    }

    async fn insert_txn(&self, draft: Record) -> Result<Record> {
        let txn = self.db.conn().begin().await?;
        let row = self.insert_in(&txn, draft).await?;
        txn.commit().await?;
        Ok(row)
    }

    /// Inserts every draft or none of them.
    pub async fn insert_many(&self, drafts: Vec<Record>) -> Result<Vec<Record>> {
        self.db.autosaved(self.insert_many_txn(drafts)).await
    }

    async fn insert_many_txn(&self, drafts: Vec<Record>) -> Result<Vec<Record>> {
        let txn = self.db.conn().begin().await?;
        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            out.push(self.insert_in(&txn, draft).await?);
        }
        txn.commit().await?;
        Ok(out)
    }

    /// Applies `changes` to the row keyed `key` and returns the updated row.
    pub async fn update(&self, key: impl Into<Value>, changes: Record) -> Result<Record> {
        self.db.autosaved(self.update_txn(key.into(), changes)).await
    }

    async fn update_txn(&self, key: Value, changes: Record) -> Result<Record> {
        let txn = self.db.conn().begin().await?;
        let row = self.update_in(&txn, key, changes).await?;
        txn.commit().await?;
        Ok(row)
    }

    /// Deletes one row and its cascading dependents; returns 0 when the key is unknown.
    pub async fn delete_by_id(&self, key: impl Into<Value>) -> Result<u64> {
        let cond = self.key_condition(key.into());
        self.db.autosaved(self.delete_txn(cond)).await
    }

    pub async fn delete_where(&self, filter: Condition) -> Result<u64> {
        self.db.autosaved(self.delete_txn(filter)).await
    }

    async fn delete_txn(&self, cond: Condition) -> Result<u64> {
        let txn = self.db.conn().begin().await?;
        let n = self.delete_cascade_in(&txn, self.config.clone(), cond).await?;
        txn.commit().await?;
        Ok(n)
    }

    // building blocks, run on whatever connection or transaction the caller holds

    pub(crate) async fn select_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        cfg: &TableConfig,
        filter: Option<&Condition>,
        window: &Window,
    ) -> Result<Vec<Record>> {
        let dialect = self.db.dialect();
        let translated = match &window.order {
            Some((field, _)) if !cfg.table().has_column(field) => Err(StoreError::Unsupported(
                format!("ordering by computed field `{}`", field),
            )),
            _ => filter::to_sql(cfg.table(), dialect, filter),
        };
        match translated {
            Ok(expr) => {
                let mut rows = rows::select(conn, dialect, cfg.table(), Some(expr), window).await?;
                for row in &mut rows {
                    cfg.materialize(row);
                }
                Ok(rows)
            }
            Err(StoreError::Unsupported(reason)) => {
                log::debug!(
                    target: "caddie::filter",
                    "evaluating `{}` in memory: {}",
                    cfg.name(),
                    reason
                );
                let all = rows::select(conn, dialect, cfg.table(), None, &Window::default()).await?;
                let mut rows: Vec<Record> = all
                    .into_iter()
                    .map(|mut row| {
                        cfg.materialize(&mut row);
                        row
                    })
                    .filter(|row| evaluate(row, filter))
                    .collect();
                if let Some((field, order)) = &window.order {
                    rows.sort_by(|a, b| {
                        let o = order_values(a.get(field), b.get(field));
                        if matches!(order, Order::Desc) {
                            o.reverse()
                        } else {
                            o
                        }
                    });
                }
                let limit = window.limit.map_or(usize::MAX, |l| l as usize);
                Ok(rows
                    .into_iter()
                    .skip(window.offset as usize)
                    .take(limit)
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn count_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        cfg: &TableConfig,
        filter: Option<&Condition>,
    ) -> Result<u64> {
        let dialect = self.db.dialect();
        match filter::to_sql(cfg.table(), dialect, filter) {
            Ok(expr) => rows::count(conn, dialect, cfg.table(), Some(expr)).await,
            Err(StoreError::Unsupported(_)) => Ok(self
                .select_in(conn, cfg, filter, &Window::default())
                .await?
                .len() as u64),
            Err(e) => Err(e),
        }
    }

    async fn existing_rows<C: ConnectionTrait>(&self, conn: &C, row: &Record) -> Result<Vec<Record>> {
        if self.config.needs_existing(row) {
            rows::select(
                conn,
                self.db.dialect(),
                self.config.table(),
                None,
                &Window::default(),
            )
            .await
        } else {
            Ok(Vec::new())
        }
    }

    /// Unique fields and combinations of `row`, skipping any containing a null.
    async fn check_unique<C: ConnectionTrait>(
        &self,
        conn: &C,
        row: &Record,
        own_key: Option<&Value>,
    ) -> Result<()> {
        let cfg = &self.config;
        let singles = cfg.unique_fields().iter().map(std::slice::from_ref);
        let combos = cfg.unique_combos().iter().map(Vec::as_slice);
        for fields in singles.chain(combos) {
            let values: Option<Vec<(&String, &Value)>> = fields
                .iter()
                .map(|f| row.get(f).filter(|v| !v.is_null()).map(|v| (f, v)))
                .collect();
            let Some(values) = values else {
                continue;
            };
            let mut conds: Vec<Condition> = values
                .iter()
                .map(|(f, v)| Condition::eq(f.as_str(), (*v).clone()))
                .collect();
            if let Some(key) = own_key {
                conds.push(Condition::ne(cfg.primary_key(), key.clone()));
            }
            if self.count_in(conn, cfg, Some(&Condition::and(conds))).await? > 0 {
                let shown: Vec<String> = values.iter().map(|(f, v)| format!("{} = {}", f, v)).collect();
                return Err(StoreError::constraint(
                    cfg.name(),
                    format!("duplicate value for unique {}", shown.join(", ")),
                ));
            }
        }
        Ok(())
    }

    /// Every non-null foreign key in `row` must point at an existing row.
    async fn check_references<C: ConnectionTrait>(&self, conn: &C, row: &Record) -> Result<()> {
        for fk in self.config.foreign_keys() {
            let Some(v) = row.get(&fk.field).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = self.schema.table(&fk.table)?;
            let cond = Condition::eq(fk.references_field.as_str(), v.clone());
            if self.count_in(conn, target, Some(&cond)).await? == 0 {
                return Err(StoreError::constraint(
                    self.config.name(),
                    format!(
                        "`{}` = {} references a missing `{}`.`{}`",
                        fk.field, v, fk.table, fk.references_field
                    ),
                ));
            }
        }
        Ok(())
    }

    pub(crate) async fn insert_in<C: ConnectionTrait>(&self, conn: &C, draft: Record) -> Result<Record> {
        let existing = self.existing_rows(conn, &draft).await?;
        let mut row = self.config.prepare_insert(draft, &existing)?;
        self.check_unique(conn, &row, None).await?;
        self.check_references(conn, &row).await?;
        rows::insert(conn, self.db.dialect(), self.config.table(), &row).await?;
        fill_nulls(&self.config, &mut row);
        self.config.materialize(&mut row);
        Ok(row)
    }

    pub(crate) async fn update_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: Value,
        mut changes: Record,
    ) -> Result<Record> {
        let cfg = &self.config;
        let pk = cfg.primary_key();
        if let Some(new_key) = changes.remove(pk) {
            if !new_key.is_null() && new_key != key {
                return Err(StoreError::validation(
                    cfg.name(),
                    format!("primary key `{}` cannot change", pk),
                ));
            }
        }
        let window = Window {
            limit: Some(1),
            ..Default::default()
        };
        let mut current = self
            .select_in(conn, cfg, Some(&self.key_condition(key.clone())), &window)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                table: cfg.name().to_string(),
                key: key.to_string(),
            })?;
        cfg.strip_computed(&mut current);

        let mut merged = current.clone();
        merged.extend(changes);
        let existing = self.existing_rows(conn, &merged).await?;
        let mut next = cfg.prepare_update(merged, &existing)?;

        let diff = changed_fields(&current, &next);
        if !diff.is_empty() {
            let touches = |fields: &[String]| fields.iter().any(|f| diff.contains_key(f));
            if cfg.unique_fields().iter().any(|f| diff.contains_key(f))
                || cfg.unique_combos().iter().any(|c| touches(c.as_slice()))
            {
                self.check_unique(conn, &next, Some(&key)).await?;
            }
            self.check_references(conn, &diff).await?;
            let dialect = self.db.dialect();
            let by_key = rows::key_filter(dialect, cfg.table(), vec![key])?;
            rows::update(conn, dialect, cfg.table(), by_key, &diff).await?;
        }
        fill_nulls(cfg, &mut next);
        cfg.materialize(&mut next);
        Ok(next)
    }

    /// Deletes the rows of `cfg` matching `cond`, then their dependents, breadth first.
    /// A dependent that does not cascade fails the whole operation.
    pub(crate) async fn delete_cascade_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        cfg: Arc<TableConfig>,
        cond: Condition,
    ) -> Result<u64> {
        let dialect = self.db.dialect();
        let root = cfg.name().to_string();
        let mut deleted_root = 0;
        let mut work = VecDeque::from([(cfg, cond)]);
        while let Some((cfg, cond)) = work.pop_front() {
            let doomed = self.select_in(conn, &cfg, Some(&cond), &Window::default()).await?;
            if doomed.is_empty() {
                continue;
            }
            let pk = cfg.primary_key();
            let keys: Vec<Value> = doomed
                .iter()
                .map(|r| r.get(pk).cloned().unwrap_or_default())
                .collect();
            let by_keys = rows::key_filter(dialect, cfg.table(), keys)?;
            let n = rows::delete(conn, dialect, cfg.table(), by_keys).await?;
            if cfg.name() == root && deleted_root == 0 {
                deleted_root = n;
            } else {
                log::debug!(target: "caddie::db", "cascade deleted {} rows from `{}`", n, cfg.name());
            }

            for (dep, fk) in self.schema.dependents(cfg.name()) {
                let referenced: Vec<Value> = doomed
                    .iter()
                    .filter_map(|r| r.get(&fk.references_field))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .collect();
                if referenced.is_empty() {
                    continue;
                }
                let dep_cond = Condition::any_of(fk.field.as_str(), referenced);
                if fk.cascade_delete {
                    work.push_back((dep.clone(), dep_cond));
                } else if self.count_in(conn, dep, Some(&dep_cond)).await? > 0 {
                    return Err(StoreError::constraint(
                        cfg.name(),
                        format!("rows of `{}` still reference it through `{}`", dep.name(), fk.field),
                    ));
                }
            }
        }
        Ok(deleted_root)
    }
}
