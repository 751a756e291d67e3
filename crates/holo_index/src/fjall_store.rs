//! Persistent single-node store over fjall.
//!
//! Each table is one fjall partition. A cell is one key/value pair whose key
//! is laid out as
//!
//! ```text
//! escape(row) ++ 0x00 0x01 ++ family ++ 0x00 ++ qualifier
//! ```
//!
//! `escape` rewrites every `0x00` in the row key as `0x00 0xFF`. The row
//! terminator `0x00 0x01` sorts below any escaped byte, so partition order is
//! row order, then family, then qualifier, and a row-key prefix maps to a
//! cell-key prefix.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::error::IndexError;
use crate::store::{Mutation, ReadFilter, Row, RowSet, WideColumnStore, WideColumnTable};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const ROW_END: [u8; 2] = [0x00, 0x01];
const FAMILY_END: u8 = 0x00;
const MAX_TABLE_NAME_LEN: usize = 255;

pub struct FjallStore {
    keyspace: Arc<Keyspace>,
}

impl FjallStore {
    /// Open (or create) a keyspace rooted at `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create store dir {}", dir.display()))?;
        let keyspace = fjall::Config::new(dir)
            .open()
            .with_context(|| format!("open fjall keyspace at {}", dir.display()))?;
        Ok(Self::from_keyspace(Arc::new(keyspace)))
    }

    pub fn from_keyspace(keyspace: Arc<Keyspace>) -> Self {
        Self { keyspace }
    }
}

impl WideColumnStore for FjallStore {
    fn open(&self, table: &str) -> anyhow::Result<Arc<dyn WideColumnTable>> {
        validate_table_name(table)?;
        let partition = self
            .keyspace
            .open_partition(table, PartitionCreateOptions::default())
            .with_context(|| format!("open partition for table {table}"))?;
        Ok(Arc::new(FjallTable {
            name: table.to_string(),
            keyspace: self.keyspace.clone(),
            partition,
        }))
    }

    fn close(&self) -> anyhow::Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("persist fjall keyspace")
    }
}

/// fjall accepts alphanumerics plus `_ - # $` in partition names.
fn validate_table_name(name: &str) -> Result<(), IndexError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'#' | b'$'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidTableName(name.to_string()))
    }
}

struct FjallTable {
    name: String,
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
}

fn escape_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 2);
    for &b in row {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out
}

fn row_prefix(row: &[u8]) -> Vec<u8> {
    let mut out = escape_row(row);
    out.extend_from_slice(&ROW_END);
    out
}

fn cell_key(row: &[u8], family: &str, qualifier: &[u8]) -> Vec<u8> {
    let mut out = row_prefix(row);
    out.extend_from_slice(family.as_bytes());
    out.push(FAMILY_END);
    out.extend_from_slice(qualifier);
    out
}

/// Split a cell key into `(row, family, qualifier)`.
fn decode_cell_key(key: &[u8]) -> anyhow::Result<(Vec<u8>, &str, &[u8])> {
    let mut row = Vec::with_capacity(key.len());
    let mut i = 0;
    let rest = loop {
        match key.get(i) {
            None => anyhow::bail!("corrupt cell key: missing row terminator"),
            Some(&ESCAPE) => match key.get(i + 1) {
                Some(&ESCAPED_ZERO) => {
                    row.push(ESCAPE);
                    i += 2;
                }
                Some(&b) if b == ROW_END[1] => break &key[i + 2..],
                _ => anyhow::bail!("corrupt cell key: bad escape at offset {i}"),
            },
            Some(&b) => {
                row.push(b);
                i += 1;
            }
        }
    };
    let split = rest
        .iter()
        .position(|b| *b == FAMILY_END)
        .context("corrupt cell key: missing family terminator")?;
    let family = std::str::from_utf8(&rest[..split]).context("corrupt cell key: family is not utf-8")?;
    Ok((row, family, &rest[split + 1..]))
}

/// Rows buffered between the scan thread and the reader.
const ROW_CHANNEL_DEPTH: usize = 1;

/// Scan the requested rows in key order, handing each non-empty row to
/// `sink` as soon as its last cell is read. Stops when `sink` returns
/// `false`. Returns the number of rows materialized.
fn scan_rows(
    partition: &PartitionHandle,
    rows: &RowSet,
    filter: &ReadFilter,
    sink: &mut dyn FnMut(Row) -> bool,
) -> anyhow::Result<usize> {
    let mut scanned = 0;
    let mut emit = |row: Row| {
        scanned += 1;
        row.is_empty() || sink(row)
    };
    match rows {
        RowSet::Keys(keys) => {
            let mut keys = keys.clone();
            keys.sort();
            keys.dedup();
            for key in &keys {
                let mut row = Row::new(key.as_slice());
                let mut found = false;
                for item in partition.prefix(row_prefix(key)) {
                    let (cell, value) = item?;
                    let (_, family, qualifier) = decode_cell_key(&cell)?;
                    found = true;
                    if filter.matches(family, qualifier) {
                        row.push(family, qualifier, value.to_vec());
                    }
                }
                if found && !emit(row) {
                    break;
                }
            }
        }
        RowSet::Range(range) => {
            let mut current: Option<Row> = None;
            for item in partition.range(escape_row(range.start())..) {
                let (cell, value) = item?;
                let (key, family, qualifier) = decode_cell_key(&cell)?;
                if range.is_past(&key) {
                    break;
                }
                if !range.contains(&key) {
                    continue;
                }
                if current.as_ref().map_or(true, |row| row.key() != key.as_slice()) {
                    if let Some(done) = current.take() {
                        if !emit(done) {
                            return Ok(scanned);
                        }
                    }
                    current = Some(Row::new(key));
                }
                if filter.matches(family, qualifier) {
                    if let Some(row) = current.as_mut() {
                        row.push(family, qualifier, value.to_vec());
                    }
                }
            }
            if let Some(done) = current {
                emit(done);
            }
        }
    }
    Ok(scanned)
}

impl FjallTable {
    /// Stream rows from a blocking scan task through a bounded channel. The
    /// scan ends as soon as `on_row` returns `false` and the receiver is
    /// dropped.
    async fn stream_rows(
        &self,
        rows: RowSet,
        filter: &ReadFilter,
        on_row: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> anyhow::Result<()> {
        let partition = self.partition.clone();
        let filter = filter.clone();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Row>(ROW_CHANNEL_DEPTH);
        let scan = tokio::task::spawn_blocking(move || {
            scan_rows(&partition, &rows, &filter, &mut |row: Row| tx.blocking_send(row).is_ok())
        });

        while let Some(row) = rx.recv().await {
            if !on_row(row) {
                break;
            }
        }
        drop(rx);

        let scanned = scan
            .await
            .with_context(|| format!("read task for table {}", self.name))??;
        tracing::trace!(table = %self.name, rows = scanned, "fjall scan finished");
        Ok(())
    }
}

#[async_trait]
impl WideColumnTable for FjallTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply_bulk(
        &self,
        rows: Vec<(Vec<u8>, Mutation)>,
    ) -> anyhow::Result<Vec<Option<anyhow::Error>>> {
        let keyspace = self.keyspace.clone();
        let partition = self.partition.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Option<anyhow::Error>>> {
            let mut batch = keyspace.batch();
            for (row, mutation) in &rows {
                for (family, qualifier, value) in mutation.cells() {
                    batch.insert(&partition, cell_key(row, family, qualifier), value.to_vec());
                }
            }
            batch
                .commit()
                .with_context(|| format!("commit fjall batch for table {name}"))?;
            Ok(rows.iter().map(|_| None).collect())
        })
        .await
        .with_context(|| format!("write task for table {}", self.name))?
    }

    async fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> anyhow::Result<Row> {
        let mut found = None;
        self.stream_rows(RowSet::Keys(vec![row_key.to_vec()]), filter, &mut |row: Row| {
            found = Some(row);
            false
        })
        .await?;
        Ok(found.unwrap_or_else(|| Row::new(row_key)))
    }

    async fn read_rows(
        &self,
        rows: RowSet,
        filter: &ReadFilter,
        on_row: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> anyhow::Result<()> {
        self.stream_rows(rows, filter, on_row).await
    }
}
