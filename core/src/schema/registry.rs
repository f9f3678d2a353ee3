use std::collections::HashMap;
use std::sync::Arc;

use super::config::TableConfig;
use crate::db::column::ForeignKey;
use crate::error::{Result, StoreError};

/// Every table of a database, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    tables: Vec<Arc<TableConfig>>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(configs: impl IntoIterator<Item = TableConfig>) -> Result<Self> {
        let mut schema = Schema::default();
        for cfg in configs {
            cfg.check_fields()?;
            if schema.by_name.contains_key(cfg.name()) {
                return Err(StoreError::Schema(format!(
                    "table `{}` declared twice",
                    cfg.name()
                )));
            }
            schema
                .by_name
                .insert(cfg.name().to_string(), schema.tables.len());
            schema.tables.push(Arc::new(cfg));
        }
        schema.check_references()?;
        Ok(schema)
    }

    fn check_references(&self) -> Result<()> {
        for cfg in &self.tables {
            for fk in cfg.foreign_keys() {
                let target = self.get(&fk.table).ok_or_else(|| {
                    StoreError::Schema(format!(
                        "`{}.{}` references unknown table `{}`",
                        cfg.name(),
                        fk.field,
                        fk.table
                    ))
                })?;
                let keyed = target
                    .table()
                    .column(&fk.references_field)
                    .is_some_and(|c| c.is_unique())
                    || target.unique_fields().contains(&fk.references_field);
                if !keyed {
                    return Err(StoreError::Schema(format!(
                        "`{}.{}` references `{}.{}`, which is neither primary key nor unique",
                        cfg.name(),
                        fk.field,
                        fk.table,
                        fk.references_field
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableConfig>> {
        self.by_name.get(name).map(|i| &self.tables[*i])
    }

    pub fn table(&self, name: &str) -> Result<&Arc<TableConfig>> {
        self.get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableConfig>> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables holding a foreign key into `table`, with that key.
    pub fn dependents(&self, table: &str) -> Vec<(&Arc<TableConfig>, &ForeignKey)> {
        self.tables
            .iter()
            .flat_map(|cfg| {
                cfg.foreign_keys()
                    .iter()
                    .filter(|fk| fk.table == table)
                    .map(move |fk| (cfg, fk))
            })
            .collect()
    }
}
