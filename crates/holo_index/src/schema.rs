//! Logical index model shared by the write and read paths.

/// One logical index entry. The last write for a given
/// `(table_name, hash_value, range_value)` wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub table_name: String,
    pub hash_value: String,
    pub range_value: Vec<u8>,
    pub value: Vec<u8>,
}

/// Logical read against one hash value.
///
/// At most one of `range_value_prefix` / `range_value_start` is meaningful;
/// the prefix wins when both are set. An empty prefix or start is treated as
/// unset. `value_equal` is an exact-match post-filter applied client-side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexQuery {
    pub table_name: String,
    pub hash_value: String,
    pub range_value_prefix: Option<Vec<u8>>,
    pub range_value_start: Option<Vec<u8>>,
    pub value_equal: Option<Vec<u8>>,
}

impl IndexQuery {
    pub fn new(table_name: impl Into<String>, hash_value: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            hash_value: hash_value.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.range_value_prefix = Some(prefix.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<Vec<u8>>) -> Self {
        self.range_value_start = Some(start.into());
        self
    }

    pub fn with_value_equal(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value_equal = Some(value.into());
        self
    }

    pub fn prefix(&self) -> Option<&[u8]> {
        non_empty(self.range_value_prefix.as_deref())
    }

    pub fn start(&self) -> Option<&[u8]> {
        non_empty(self.range_value_start.as_deref())
    }

    pub fn value_equal(&self) -> Option<&[u8]> {
        self.value_equal.as_deref()
    }

    /// True when `value` passes the exact-value post-filter.
    pub fn value_matches(&self, value: &[u8]) -> bool {
        self.value_equal().map_or(true, |expected| expected == value)
    }
}

fn non_empty(bytes: Option<&[u8]>) -> Option<&[u8]> {
    bytes.filter(|b| !b.is_empty())
}

/// Forward-only cursor over the `(range value, value)` pairs of a batch.
///
/// `range_value` and `value` are only valid after `next` returned `true`.
/// Once `next` returns `false` it keeps returning `false`.
pub trait ReadBatchIterator {
    fn next(&mut self) -> bool;
    fn range_value(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// A batch of results delivered to a query callback.
pub trait ReadBatch: Send + Sync {
    fn iter(&self) -> Box<dyn ReadBatchIterator + '_>;
}

/// Callback used by multi-query reads. Returning `false` asks the reader to
/// stop scanning the current physical read.
pub type QueryCallback<'a> = dyn Fn(&IndexQuery, &dyn ReadBatch) -> bool + Send + Sync + 'a;

/// Callback used by single-query reads.
pub type BatchCallback<'a> = dyn FnMut(&dyn ReadBatch) -> bool + Send + 'a;

/// Drain a batch into owned `(range value, value)` pairs.
pub fn collect_batch(batch: &dyn ReadBatch) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut iter = batch.iter();
    while iter.next() {
        out.push((iter.range_value().to_vec(), iter.value().to_vec()));
    }
    out
}
