//! Translate logical index queries into physical read descriptors.
//!
//! Value-equality filtering is never pushed into the store: the store can
//! only match values by substring/regex, so exact matching happens after the
//! read, against the query's `value_equal`.

use crate::keys::{composite_key, COLUMN_FAMILY, NULL};
use crate::schema::IndexQuery;
use crate::store::{ReadFilter, RowRange, RowSet};

/// Physical fetch for one logical query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadPlan {
    /// Scan of many composite rows; every row is one result.
    RowRange { range: RowRange, filter: ReadFilter },
    /// Read of one row; every surviving column is one result.
    SingleRow { row_key: Vec<u8>, filter: ReadFilter },
}

impl ReadPlan {
    pub fn filter(&self) -> &ReadFilter {
        match self {
            Self::RowRange { filter, .. } | Self::SingleRow { filter, .. } => filter,
        }
    }

    pub fn row_set(&self) -> RowSet {
        match self {
            Self::RowRange { range, .. } => RowSet::Range(range.clone()),
            Self::SingleRow { row_key, .. } => RowSet::Keys(vec![row_key.clone()]),
        }
    }
}

pub fn plan_legacy(query: &IndexQuery) -> ReadPlan {
    let hash = query.hash_value.as_str();
    let range = if let Some(prefix) = query.prefix() {
        RowRange::prefix(composite_key(hash, prefix))
    } else if let Some(start) = query.start() {
        RowRange::new(composite_key(hash, start), composite_key(hash, &[NULL]))
    } else {
        RowRange::prefix(composite_key(hash, &[]))
    };
    ReadPlan::RowRange {
        range,
        filter: ReadFilter::family(COLUMN_FAMILY),
    }
}

pub fn plan_column_key(query: &IndexQuery) -> ReadPlan {
    let mut filter = ReadFilter::family(COLUMN_FAMILY);
    if let Some(prefix) = query.prefix() {
        let mut end = prefix.to_vec();
        end.push(NULL);
        filter = filter.with_column_range(COLUMN_FAMILY, prefix.to_vec(), end);
    } else if let Some(start) = query.start() {
        filter = filter.with_column_range(COLUMN_FAMILY, start.to_vec(), vec![NULL]);
    }
    ReadPlan::SingleRow {
        row_key: query.hash_value.as_bytes().to_vec(),
        filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ColumnRange;

    #[test]
    fn legacy_plans_scope_to_composite_rows() {
        let full = plan_legacy(&IndexQuery::new("t", "A"));
        assert_eq!(full.row_set(), RowSet::Range(RowRange::prefix(b"A\x00".to_vec())));
        assert_eq!(full.filter(), &ReadFilter::family("f"));

        let prefixed = plan_legacy(&IndexQuery::new("t", "A").with_prefix(vec![1]));
        assert_eq!(prefixed.row_set(), RowSet::Range(RowRange::prefix(b"A\x00\x01".to_vec())));

        let started = plan_legacy(&IndexQuery::new("t", "A").with_start(vec![3]));
        assert_eq!(
            started.row_set(),
            RowSet::Range(RowRange::new(b"A\x00\x03".to_vec(), b"A\x00\xff".to_vec()))
        );
    }

    #[test]
    fn legacy_prefix_beats_start() {
        let plan = plan_legacy(&IndexQuery::new("t", "A").with_prefix(vec![1]).with_start(vec![2]));
        assert_eq!(plan.row_set(), RowSet::Range(RowRange::prefix(b"A\x00\x01".to_vec())));
    }

    #[test]
    fn column_key_plans_narrow_columns_of_one_row() {
        let full = plan_column_key(&IndexQuery::new("t", "A"));
        assert_eq!(full.row_set(), RowSet::Keys(vec![b"A".to_vec()]));
        assert_eq!(full.filter().column_range, None);

        let prefixed = plan_column_key(&IndexQuery::new("t", "A").with_prefix(vec![1]));
        assert_eq!(
            prefixed.filter().column_range,
            Some(ColumnRange {
                family: "f".to_string(),
                start: vec![1],
                end: vec![1, 0xff],
            })
        );

        let started = plan_column_key(&IndexQuery::new("t", "A").with_start(vec![3]));
        assert_eq!(
            started.filter().column_range,
            Some(ColumnRange {
                family: "f".to_string(),
                start: vec![3],
                end: vec![0xff],
            })
        );
    }
}
