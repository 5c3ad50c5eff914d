use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::error::LakehouseError;
use crate::lakehouse::{Frame, Lakehouse, Row};

/// Keeps materialized tables in memory.
#[derive(Debug, Default)]
pub struct MemLakehouse {
    tables: Mutex<BTreeMap<String, Frame>>,
}

impl MemLakehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of every table persisted so far, keyed by table name.
    pub fn collected_tables(&self) -> BTreeMap<String, Vec<Row>> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, frame)| (name.clone(), frame.rows().to_vec()))
            .collect()
    }
}

impl Lakehouse for MemLakehouse {
    fn persist(&self, table: &str, frame: &Frame) -> Result<(), LakehouseError> {
        super::check_table(table)?;
        let mut tables = self.tables.lock().map_err(|_| LakehouseError::Poisoned)?;
        tables.insert(table.to_string(), frame.clone());

        tracing::debug!(table, rows = frame.len(), "collected table");
        Ok(())
    }

    fn read(&self, table: &str) -> Result<Frame, LakehouseError> {
        let tables = self.tables.lock().map_err(|_| LakehouseError::Poisoned)?;
        tables
            .get(table)
            .cloned()
            .ok_or_else(|| LakehouseError::TableNotFound(table.to_string()))
    }
}
