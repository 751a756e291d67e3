//! Write batches: index entries grouped by table and physical row.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use crate::keys::{KeyCodec, COLUMN_FAMILY};
use crate::schema::IndexEntry;
use crate::store::{with_deadline, Mutation, WideColumnStore};

/// Pending index writes, keyed `table -> row key -> mutation`.
///
/// Entries that land on the same table, row and column overwrite each other;
/// the last `add` wins. A batch is single-owner and committed once.
pub struct WriteBatch {
    tables: BTreeMap<String, BTreeMap<Vec<u8>, Mutation>>,
    codec: &'static dyn KeyCodec,
}

impl WriteBatch {
    pub fn new(codec: &'static dyn KeyCodec) -> Self {
        Self {
            tables: BTreeMap::new(),
            codec,
        }
    }

    pub fn add(&mut self, table_name: &str, hash_value: &str, range_value: &[u8], value: &[u8]) {
        let rows = self.tables.entry(table_name.to_string()).or_default();
        let (row_key, column_key) = self.codec.encode(hash_value, range_value);
        rows.entry(row_key)
            .or_default()
            .set(COLUMN_FAMILY, column_key, value);
    }

    pub fn add_entry(&mut self, entry: &IndexEntry) {
        self.add(
            &entry.table_name,
            &entry.hash_value,
            &entry.range_value,
            &entry.value,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of distinct physical rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn mutation(&self, table_name: &str, row_key: &[u8]) -> Option<&Mutation> {
        self.tables.get(table_name)?.get(row_key)
    }

    /// Apply the batch, one bulk request per table.
    ///
    /// Rows are applied independently by the store. The first per-row or
    /// request error aborts the commit; tables already committed stay
    /// committed. Re-running a failed batch is safe because every mutation is
    /// a last-write-wins set.
    pub async fn commit(
        self,
        store: &dyn WideColumnStore,
        deadline: Option<Duration>,
    ) -> anyhow::Result<()> {
        for (table_name, rows) in self.tables {
            let table = store
                .open(&table_name)
                .with_context(|| format!("open table {table_name}"))?;
            let row_count = rows.len();
            let rows: Vec<(Vec<u8>, Mutation)> = rows.into_iter().collect();

            let errs = with_deadline(
                deadline,
                format!("apply_bulk on {table_name}"),
                table.apply_bulk(rows),
            )
            .await
            .with_context(|| format!("bulk write to table {table_name}"))?;

            if let Some(err) = errs.into_iter().flatten().next() {
                warn!(table = %table_name, rows = row_count, error = ?err, "index row write failed");
                return Err(err.context(format!("bulk write to table {table_name}")));
            }
            debug!(table = %table_name, rows = row_count, "committed index rows");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("scheme", &self.codec.scheme())
            .field("tables", &self.tables.len())
            .field("rows", &self.row_count())
            .finish()
    }
}
