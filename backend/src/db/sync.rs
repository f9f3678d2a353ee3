//! Upserts and child-set synchronisation for nested graphs, such as a round
//! written together with its per-hole scores.

use sea_orm::{ConnectionTrait, TransactionTrait};

use caddie_core::filter::Condition;
use caddie_core::{Record, Result, StoreError, Value};

use super::rows::Window;
use super::service::TableService;

fn target_fields<'a>(service: &'a TableService, conflict_target: Option<&'a [&'a str]>) -> Vec<&'a str> {
    match conflict_target {
        Some(fields) => fields.to_vec(),
        None => vec![service.config().primary_key()],
    }
}

/// Equality on every target field, or `None` when one of them is missing.
fn target_condition(entity: &Record, fields: &[&str]) -> Option<Condition> {
    let conds: Option<Vec<Condition>> = fields
        .iter()
        .map(|f| {
            entity
                .get(*f)
                .filter(|v| !v.is_null())
                .map(|v| Condition::eq(*f, v.clone()))
        })
        .collect();
    conds.map(Condition::and)
}

async fn upsert_in<C: ConnectionTrait>(
    service: &TableService,
    conn: &C,
    entity: Record,
    cond: Condition,
) -> Result<Record> {
    let window = Window {
        limit: Some(1),
        ..Default::default()
    };
    let found = service
        .select_in(conn, service.config(), Some(&cond), &window)
        .await?
        .into_iter()
        .next();
    match found {
        Some(row) => {
            let key = row
                .get(service.config().primary_key())
                .cloned()
                .unwrap_or_default();
            service.update_in(conn, key, entity).await
        }
        None => service.insert_in(conn, entity).await,
    }
}

async fn delete_missing_in<C: ConnectionTrait>(
    service: &TableService,
    conn: &C,
    parent_key_column: &str,
    parent_id: Value,
    keep_ids: &[Value],
) -> Result<u64> {
    let mut cond = Condition::eq(parent_key_column, parent_id);
    if !keep_ids.is_empty() {
        let keep = Condition::any_of(service.config().primary_key(), keep_ids.iter().cloned());
        cond = Condition::and([cond, keep.negate()]);
    }
    let cfg = service.schema().table(service.name())?.clone();
    service.delete_cascade_in(conn, cfg, cond).await
}

/// Inserts `entity`, or overwrites the supplied fields of the row matching it on
/// `conflict_target` (the primary key when `None`).
pub async fn upsert_entity(
    service: &TableService,
    entity: Record,
    conflict_target: Option<&[&str]>,
) -> Result<Record> {
    let fields = target_fields(service, conflict_target);
    let cond = target_condition(&entity, &fields).ok_or_else(|| {
        StoreError::validation(
            service.name(),
            format!("upsert needs a value for every field of ({})", fields.join(", ")),
        )
    })?;
    service
        .database()
        .autosaved(async {
            let txn = service.database().conn().begin().await?;
            let row = upsert_in(service, &txn, entity, cond).await?;
            txn.commit().await?;
            Ok::<_, StoreError>(row)
        })
        .await
}

/// [`upsert_entity`] over a batch in one transaction. Entries without a full conflict
/// target are skipped; returns the number of rows written.
pub async fn upsert_entities(
    service: &TableService,
    entities: Vec<Record>,
    conflict_target: Option<&[&str]>,
) -> Result<u64> {
    let fields = target_fields(service, conflict_target);
    service
        .database()
        .autosaved(async {
            let txn = service.database().conn().begin().await?;
            let mut written = 0;
            for entity in entities {
                let Some(cond) = target_condition(&entity, &fields) else {
                    log::debug!(
                        target: "caddie::sync",
                        "skipping `{}` entry without ({})",
                        service.name(),
                        fields.join(", ")
                    );
                    continue;
                };
                upsert_in(service, &txn, entity, cond).await?;
                written += 1;
            }
            txn.commit().await?;
            Ok::<_, StoreError>(written)
        })
        .await
}

/// Deletes, cascading, every row under `parent_id` whose primary key is not in `keep_ids`.
pub async fn delete_missing_children(
    service: &TableService,
    parent_key_column: &str,
    parent_id: impl Into<Value>,
    keep_ids: &[Value],
) -> Result<u64> {
    let parent_id = parent_id.into();
    service
        .database()
        .autosaved(async {
            let txn = service.database().conn().begin().await?;
            let n = delete_missing_in(service, &txn, parent_key_column, parent_id, keep_ids).await?;
            txn.commit().await?;
            Ok::<_, StoreError>(n)
        })
        .await
}

/// Makes the children under `parent_id` exactly `children`: keyed ones are upserted,
/// the rest inserted, and every other child deleted.
pub async fn sync_children(
    service: &TableService,
    parent_key_column: &str,
    parent_id: impl Into<Value>,
    children: Vec<Record>,
) -> Result<Vec<Record>> {
    let parent_id = parent_id.into();
    let pk = service.config().primary_key();
    service
        .database()
        .autosaved(async {
            let txn = service.database().conn().begin().await?;
            let mut out = Vec::with_capacity(children.len());
            for mut child in children {
                child.insert(parent_key_column.to_string(), parent_id.clone());
                let row = match target_condition(&child, &[pk]) {
                    Some(cond) => upsert_in(service, &txn, child, cond).await?,
                    None => service.insert_in(&txn, child).await?,
                };
                out.push(row);
            }
            let keep: Vec<Value> = out.iter().filter_map(|r| r.get(pk).cloned()).collect();
            let removed =
                delete_missing_in(service, &txn, parent_key_column, parent_id.clone(), &keep).await?;
            if removed > 0 {
                log::debug!(
                    target: "caddie::sync",
                    "removed {} `{}` rows under {}",
                    removed,
                    service.name(),
                    parent_id
                );
            }
            txn.commit().await?;
            Ok::<_, StoreError>(out)
        })
        .await
}
