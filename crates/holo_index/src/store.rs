//! Boundary with the physical wide-column store.
//!
//! The store is a sorted map of row keys to cells addressed by
//! `(family, qualifier)`, holding one live value per cell. The index client
//! only needs the handful of operations below; `MemoryStore` implements them
//! in-process and `FjallStore` persists them on local disk.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

/// One cell returned by a read. `column` is `family:qualifier`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadItem {
    pub row: Vec<u8>,
    pub column: Vec<u8>,
    pub value: Vec<u8>,
}

/// A physical row as returned by a read, grouped by column family.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    key: Vec<u8>,
    families: BTreeMap<String, Vec<ReadItem>>,
}

impl Row {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            families: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn family(&self, family: &str) -> Option<&[ReadItem]> {
        self.families.get(family).map(Vec::as_slice)
    }

    pub fn into_family(mut self, family: &str) -> Option<Vec<ReadItem>> {
        self.families.remove(family)
    }

    pub fn is_empty(&self) -> bool {
        self.families.values().all(Vec::is_empty)
    }

    /// Append a cell. Callers push cells in `(family, qualifier)` order.
    pub fn push(&mut self, family: &str, qualifier: &[u8], value: Vec<u8>) {
        let mut column = Vec::with_capacity(family.len() + 1 + qualifier.len());
        column.extend_from_slice(family.as_bytes());
        column.push(b':');
        column.extend_from_slice(qualifier);
        self.families
            .entry(family.to_string())
            .or_default()
            .push(ReadItem {
                row: self.key.clone(),
                column,
                value,
            });
    }
}

/// Pending cell writes for one row. Setting the same cell twice keeps the
/// later value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mutation {
    cells: BTreeMap<(String, Vec<u8>), Vec<u8>>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, family: &str, qualifier: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.cells
            .insert((family.to_string(), qualifier.into()), value.into());
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, family: &str, qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .get(&(family.to_string(), qualifier.to_vec()))
            .map(Vec::as_slice)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &[u8], &[u8])> {
        self.cells
            .iter()
            .map(|((family, qualifier), value)| (family.as_str(), qualifier.as_slice(), value.as_slice()))
    }
}

/// Contiguous span of row keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowRange {
    /// Every row whose key starts with the prefix.
    Prefix(Vec<u8>),
    /// Rows in `[start, end)`.
    Bounded { start: Vec<u8>, end: Vec<u8> },
}

impl RowRange {
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self::Bounded {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn start(&self) -> &[u8] {
        match self {
            Self::Prefix(prefix) => prefix,
            Self::Bounded { start, .. } => start,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            Self::Prefix(prefix) => key.starts_with(prefix),
            Self::Bounded { start, end } => key >= start.as_slice() && key < end.as_slice(),
        }
    }

    /// True once `key` sorts past every key in the range.
    pub fn is_past(&self, key: &[u8]) -> bool {
        match self {
            Self::Prefix(prefix) => key > prefix.as_slice() && !key.starts_with(prefix),
            Self::Bounded { end, .. } => key >= end.as_slice(),
        }
    }
}

/// Rows requested by a multi-row read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowSet {
    Keys(Vec<Vec<u8>>),
    Range(RowRange),
}

/// Qualifier span `[start, end)` inside one family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRange {
    pub family: String,
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

/// Cell filter applied by the store before returning rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadFilter {
    pub family: Option<String>,
    pub column_range: Option<ColumnRange>,
}

impl ReadFilter {
    pub fn family(family: &str) -> Self {
        Self {
            family: Some(family.to_string()),
            column_range: None,
        }
    }

    pub fn with_column_range(
        mut self,
        family: &str,
        start: impl Into<Vec<u8>>,
        end: impl Into<Vec<u8>>,
    ) -> Self {
        self.column_range = Some(ColumnRange {
            family: family.to_string(),
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn matches(&self, family: &str, qualifier: &[u8]) -> bool {
        if let Some(wanted) = &self.family {
            if wanted != family {
                return false;
            }
        }
        if let Some(range) = &self.column_range {
            if range.family != family {
                return false;
            }
            if qualifier < range.start.as_slice() || qualifier >= range.end.as_slice() {
                return false;
            }
        }
        true
    }
}

/// Build a filtered row from cells sorted by `(family, qualifier)`.
pub fn materialize_row<'a, I>(key: &[u8], cells: I, filter: &ReadFilter) -> Row
where
    I: IntoIterator<Item = (&'a str, &'a [u8], &'a [u8])>,
{
    let mut row = Row::new(key);
    for (family, qualifier, value) in cells {
        if filter.matches(family, qualifier) {
            row.push(family, qualifier, value.to_vec());
        }
    }
    row
}

/// Handle to one table in the physical store.
#[async_trait]
pub trait WideColumnTable: Send + Sync {
    fn name(&self) -> &str;

    /// Apply each row mutation independently. The returned vector holds one
    /// slot per input row; the outer error covers the whole request.
    async fn apply_bulk(
        &self,
        rows: Vec<(Vec<u8>, Mutation)>,
    ) -> anyhow::Result<Vec<Option<anyhow::Error>>>;

    /// Read one row. A missing row, or one whose cells are all filtered out,
    /// comes back empty.
    async fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> anyhow::Result<Row>;

    /// Stream rows in key order. Rows with no surviving cells are skipped.
    /// Streaming stops early when `on_row` returns `false`.
    async fn read_rows(
        &self,
        rows: RowSet,
        filter: &ReadFilter,
        on_row: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> anyhow::Result<()>;
}

/// Connection to the physical store.
pub trait WideColumnStore: Send + Sync + 'static {
    fn open(&self, table: &str) -> anyhow::Result<Arc<dyn WideColumnTable>>;

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run one store call under an optional deadline. An expired deadline
/// becomes the call's error.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    what: impl std::fmt::Display,
    fut: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("{what} timed out after {limit:?}"))?,
        None => fut.await,
    }
}

type Cells = BTreeMap<(String, Vec<u8>), Vec<u8>>;
type Rows = BTreeMap<Vec<u8>, Cells>;

/// In-process store backed by sorted maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Rows>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct cell lookup, bypassing the read path.
    pub fn cell(&self, table: &str, row: &[u8], family: &str, qualifier: &[u8]) -> Option<Vec<u8>> {
        let guard = self.tables.read().ok()?;
        guard
            .get(table)?
            .get(row)?
            .get(&(family.to_string(), qualifier.to_vec()))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .ok()
            .and_then(|guard| guard.get(table).map(BTreeMap::len))
            .unwrap_or(0)
    }
}

impl WideColumnStore for MemoryStore {
    fn open(&self, table: &str) -> anyhow::Result<Arc<dyn WideColumnTable>> {
        Ok(Arc::new(MemoryTable {
            name: table.to_string(),
            tables: self.tables.clone(),
        }))
    }
}

struct MemoryTable {
    name: String,
    tables: Arc<RwLock<HashMap<String, Rows>>>,
}

impl MemoryTable {
    /// Walk the requested rows in key order under the read lock, handing
    /// each non-empty row to `sink` as soon as it is built. Stops when `sink`
    /// returns `false`. Returns the number of rows materialized.
    fn scan_rows(
        &self,
        rows: &RowSet,
        filter: &ReadFilter,
        sink: &mut dyn FnMut(Row) -> bool,
    ) -> anyhow::Result<usize> {
        let guard = self
            .tables
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let Some(table) = guard.get(&self.name) else {
            return Ok(0);
        };

        let mut scanned = 0;
        let mut emit = |key: &[u8], cells: &Cells| {
            let row = materialize_row(key, cell_refs(cells), filter);
            scanned += 1;
            row.is_empty() || sink(row)
        };
        match rows {
            RowSet::Keys(keys) => {
                let mut keys = keys.clone();
                keys.sort();
                keys.dedup();
                for key in &keys {
                    if let Some(cells) = table.get(key) {
                        if !emit(key.as_slice(), cells) {
                            break;
                        }
                    }
                }
            }
            RowSet::Range(range) => {
                for (key, cells) in table.range(range.start().to_vec()..) {
                    if range.is_past(key) {
                        break;
                    }
                    if range.contains(key) && !emit(key.as_slice(), cells) {
                        break;
                    }
                }
            }
        }
        Ok(scanned)
    }
}

fn cell_refs(cells: &Cells) -> impl Iterator<Item = (&str, &[u8], &[u8])> {
    cells
        .iter()
        .map(|((family, qualifier), value)| (family.as_str(), qualifier.as_slice(), value.as_slice()))
}

#[async_trait]
impl WideColumnTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply_bulk(
        &self,
        rows: Vec<(Vec<u8>, Mutation)>,
    ) -> anyhow::Result<Vec<Option<anyhow::Error>>> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let table = guard.entry(self.name.clone()).or_default();
        let mut errs = Vec::with_capacity(rows.len());
        for (key, mutation) in rows {
            let cells = table.entry(key).or_default();
            for (family, qualifier, value) in mutation.cells() {
                cells.insert((family.to_string(), qualifier.to_vec()), value.to_vec());
            }
            errs.push(None);
        }
        Ok(errs)
    }

    async fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> anyhow::Result<Row> {
        let mut found = None;
        self.scan_rows(&RowSet::Keys(vec![row_key.to_vec()]), filter, &mut |row: Row| {
            found = Some(row);
            false
        })?;
        Ok(found.unwrap_or_else(|| Row::new(row_key)))
    }

    async fn read_rows(
        &self,
        rows: RowSet,
        filter: &ReadFilter,
        on_row: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> anyhow::Result<()> {
        self.scan_rows(&rows, filter, on_row)?;
        Ok(())
    }
}
