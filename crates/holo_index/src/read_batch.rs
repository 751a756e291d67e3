//! Read batches and the cursors that walk them.
//!
//! `ColumnKeyBatch` holds the index columns of one column-key row.
//! `RowBatch` holds one legacy composite row. `FilteringBatch` re-applies a
//! query's range and value bounds over any other batch.

use crate::error::IndexError;
use crate::keys::{ColumnKeyCodec, LegacyCodec, COLUMN_FAMILY};
use crate::schema::{IndexQuery, ReadBatch, ReadBatchIterator};
use crate::store::{ReadItem, Row};

/// Columns read from a single column-key row, in qualifier order.
#[derive(Clone, Debug, Default)]
pub struct ColumnKeyBatch {
    items: Vec<ReadItem>,
}

impl ColumnKeyBatch {
    pub fn new(items: Vec<ReadItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ReadBatch for ColumnKeyBatch {
    fn iter(&self) -> Box<dyn ReadBatchIterator + '_> {
        Box::new(ColumnKeyIterator {
            items: &self.items,
            next: 0,
            current: None,
        })
    }
}

pub struct ColumnKeyIterator<'a> {
    items: &'a [ReadItem],
    next: usize,
    current: Option<&'a ReadItem>,
}

impl ReadBatchIterator for ColumnKeyIterator<'_> {
    fn next(&mut self) -> bool {
        self.current = self.items.get(self.next);
        if self.current.is_some() {
            self.next += 1;
        }
        self.current.is_some()
    }

    fn range_value(&self) -> &[u8] {
        match self.current {
            Some(item) => ColumnKeyCodec::range_value(&item.column),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(item) => &item.value,
            None => &[],
        }
    }
}

/// One legacy composite row. The store hands rows over one at a time, so a
/// batch always holds exactly one row with exactly one index column.
#[derive(Clone, Debug)]
pub struct RowBatch {
    row_key: Vec<u8>,
    value: Vec<u8>,
}

impl RowBatch {
    /// Validates the single-column shape. Any other cardinality means the
    /// read path handed over a row it should never have produced; the error
    /// is fatal and no value is guessed.
    pub fn new(row: Row) -> Result<Self, IndexError> {
        let row_key = row.key().to_vec();
        let items = row.into_family(COLUMN_FAMILY).unwrap_or_default();
        if items.len() != 1 {
            return Err(IndexError::UnexpectedColumns {
                row_key,
                columns: items.len(),
            });
        }
        let value = items.into_iter().next().map(|item| item.value).unwrap_or_default();
        Ok(Self { row_key, value })
    }

    pub fn row_key(&self) -> &[u8] {
        &self.row_key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl ReadBatch for RowBatch {
    fn iter(&self) -> Box<dyn ReadBatchIterator + '_> {
        Box::new(RowBatchIterator {
            batch: self,
            consumed: false,
        })
    }
}

pub struct RowBatchIterator<'a> {
    batch: &'a RowBatch,
    consumed: bool,
}

impl ReadBatchIterator for RowBatchIterator<'_> {
    fn next(&mut self) -> bool {
        if self.consumed {
            return false;
        }
        self.consumed = true;
        true
    }

    fn range_value(&self) -> &[u8] {
        // Everything before the first separator is the hash value.
        LegacyCodec::range_value(&self.batch.row_key)
    }

    fn value(&self) -> &[u8] {
        &self.batch.value
    }
}

/// Applies a query's prefix, start and value bounds to another batch.
pub struct FilteringBatch<'a> {
    query: &'a IndexQuery,
    inner: &'a dyn ReadBatch,
}

impl<'a> FilteringBatch<'a> {
    pub fn new(query: &'a IndexQuery, inner: &'a dyn ReadBatch) -> Self {
        Self { query, inner }
    }
}

impl ReadBatch for FilteringBatch<'_> {
    fn iter(&self) -> Box<dyn ReadBatchIterator + '_> {
        Box::new(FilteringIterator {
            query: self.query,
            inner: self.inner.iter(),
        })
    }
}

struct FilteringIterator<'a> {
    query: &'a IndexQuery,
    inner: Box<dyn ReadBatchIterator + 'a>,
}

impl ReadBatchIterator for FilteringIterator<'_> {
    fn next(&mut self) -> bool {
        while self.inner.next() {
            let range_value = self.inner.range_value();
            if let Some(prefix) = self.query.prefix() {
                if !range_value.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(start) = self.query.start() {
                if start > range_value {
                    continue;
                }
            }
            if !self.query.value_matches(self.inner.value()) {
                continue;
            }
            return true;
        }
        false
    }

    fn range_value(&self) -> &[u8] {
        self.inner.range_value()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }
}
