//! In-memory reader for tests and offline runs
//!
//! Stores tables as column descriptors plus value rows and answers
//! fetches without any database, honoring column allow/deny lists,
//! filter bindings and the active converters. Error injection and
//! simulated latency cover the failure paths of the extraction engine.

use crate::{DbColumn, ParamSet, Reader, ReaderError, Row};
use async_trait::async_trait;
use datapluck_convert::{self as convert, Converter};
use datapluck_core::{Table, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MockTable {
    columns: Vec<DbColumn>,
    rows: Vec<Vec<Value>>,
}

/// In-memory [`Reader`]
///
/// Cloning shares the underlying tables, so a seeded reader can be
/// handed to the engine while the test keeps a handle.
#[derive(Clone, Default)]
pub struct MockReader {
    tables: Arc<RwLock<HashMap<String, MockTable>>>,
    metadata_errors: Arc<RwLock<HashMap<String, ReaderError>>>,
    data_errors: Arc<RwLock<HashMap<String, ReaderError>>>,
    latency_ms: u64,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate per-call latency, useful to exercise in-level concurrency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Seed a table; `rows` are aligned with `columns`
    pub async fn add_table(&self, name: &str, columns: Vec<DbColumn>, rows: Vec<Vec<Value>>) {
        self.tables
            .write()
            .await
            .insert(name.to_lowercase(), MockTable { columns, rows });
    }

    /// Fail the metadata fetch for one table
    pub async fn fail_metadata(&self, name: &str, error: ReaderError) {
        self.metadata_errors
            .write()
            .await
            .insert(name.to_lowercase(), error);
    }

    /// Fail the data fetch for one table
    pub async fn fail_data(&self, name: &str, error: ReaderError) {
        self.data_errors
            .write()
            .await
            .insert(name.to_lowercase(), error);
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

#[async_trait]
impl Reader for MockReader {
    async fn fetch_columns_metadata(&self, table: &Table) -> Result<Vec<DbColumn>, ReaderError> {
        self.simulate_latency().await;

        let key = table.name.to_lowercase();

        if let Some(error) = self.metadata_errors.read().await.get(&key) {
            return Err(error.clone());
        }

        let tables = self.tables.read().await;
        let stored = tables
            .get(&key)
            .ok_or_else(|| ReaderError::TableNotFound(table.name.clone()))?;

        let columns: Vec<DbColumn> = stored
            .columns
            .iter()
            .filter(|c| {
                if !table.columns.is_empty() {
                    contains_ignore_case(&table.columns, &c.name)
                } else if !table.ignore.is_empty() {
                    !contains_ignore_case(&table.ignore, &c.name)
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        if columns.is_empty() {
            return Err(ReaderError::NoMetadata(table.name.clone()));
        }

        Ok(columns)
    }

    async fn fetch_data(
        &self,
        table: &str,
        columns: &[DbColumn],
        converters: &[Arc<dyn Converter>],
        param_sets: &[ParamSet],
    ) -> Result<Vec<Row>, ReaderError> {
        self.simulate_latency().await;

        let key = table.to_lowercase();

        if let Some(error) = self.data_errors.read().await.get(&key) {
            return Err(error.clone());
        }

        let tables = self.tables.read().await;
        let stored = tables
            .get(&key)
            .ok_or_else(|| ReaderError::TableNotFound(table.to_string()))?;

        let mut out = Vec::new();

        if param_sets.is_empty() {
            collect_rows(stored, columns, converters, None, &mut out)?;
        } else {
            for params in param_sets {
                collect_rows(stored, columns, converters, Some(params), &mut out)?;
            }
        }

        Ok(out)
    }
}

fn collect_rows(
    stored: &MockTable,
    columns: &[DbColumn],
    converters: &[Arc<dyn Converter>],
    params: Option<&ParamSet>,
    out: &mut Vec<Row>,
) -> Result<(), ReaderError> {
    for values in &stored.rows {
        let matches = params
            .map(|set| {
                set.iter().all(|(name, bound)| {
                    cell(stored, values, name).is_some_and(|v| values_match(v, bound))
                })
            })
            .unwrap_or(true);

        if !matches {
            continue;
        }

        let mut row = Row::with_capacity(columns.len());
        for column in columns {
            let value = cell(stored, values, &column.name)
                .cloned()
                .unwrap_or(Value::Null);
            row.push((column.clone(), convert::apply(value, converters)?));
        }

        out.push(row);
    }

    Ok(())
}

fn cell<'a>(stored: &MockTable, values: &'a [Value], column: &str) -> Option<&'a Value> {
    stored
        .columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(column))
        .and_then(|i| values.get(i))
}

/// Filter bindings come from literals (text) as well as fetched values,
/// so a text `"34"` must match an integer 34 the way a SQL backend would
/// coerce it.
fn values_match(actual: &Value, bound: &Value) -> bool {
    actual == bound || actual.to_string() == bound.to_string()
}

fn contains_ignore_case(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}
