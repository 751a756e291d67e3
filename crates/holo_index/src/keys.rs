//! Row/column key layouts for index entries.
//!
//! Two layouts exist and they cannot be mixed inside one physical table:
//! - legacy composite-row: `row = hash ++ 0x00 ++ range`, single column `f:c`;
//! - column-key: `row = hash`, one column per range value under `f`.
//!
//! The column-key layout keeps the raw hash as the row key instead of hashing
//! it, so moving data between row layouts stays a plain key rewrite.

use serde::{Deserialize, Serialize};

use crate::planner::{self, ReadPlan};
use crate::schema::IndexQuery;

/// Column family holding every index cell.
pub const COLUMN_FAMILY: &str = "f";
/// Prefix of fully qualified column names returned by reads.
pub const COLUMN_PREFIX: &str = "f:";
/// Qualifier of the single column used by the legacy layout.
pub const COLUMN: &[u8] = b"c";
/// Delimiter between hash and range in legacy row keys.
pub const SEPARATOR: u8 = 0x00;
/// Maximal byte used as an open upper bound for range scans.
pub const NULL: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    Legacy,
    ColumnKey,
}

impl KeyScheme {
    pub fn codec(self) -> &'static dyn KeyCodec {
        match self {
            Self::Legacy => &LegacyCodec,
            Self::ColumnKey => &ColumnKeyCodec,
        }
    }
}

impl std::fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::ColumnKey => f.write_str("column_key"),
        }
    }
}

/// Maps logical `(hash, range)` pairs to physical addresses and plans reads.
pub trait KeyCodec: Send + Sync + 'static {
    fn scheme(&self) -> KeyScheme;

    /// Returns `(row key, column qualifier)` for one entry.
    fn encode(&self, hash_value: &str, range_value: &[u8]) -> (Vec<u8>, Vec<u8>);

    /// Physical fetch descriptor for one logical query.
    fn plan(&self, query: &IndexQuery) -> ReadPlan;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyCodec;

impl LegacyCodec {
    /// Split a legacy row key into `(hash, range)` on the first separator.
    /// Hash values containing the separator do not round-trip.
    pub fn decode(row_key: &[u8]) -> Option<(String, Vec<u8>)> {
        let split = row_key.iter().position(|b| *b == SEPARATOR)?;
        let hash = std::str::from_utf8(&row_key[..split]).ok()?;
        Some((hash.to_string(), row_key[split + 1..].to_vec()))
    }

    /// The range portion of a legacy row key; empty if no separator exists.
    pub fn range_value(row_key: &[u8]) -> &[u8] {
        match row_key.iter().position(|b| *b == SEPARATOR) {
            Some(split) => &row_key[split + 1..],
            None => &[],
        }
    }
}

/// `hash ++ 0x00 ++ suffix`, the shape of every legacy row key and bound.
pub fn composite_key(hash_value: &str, suffix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hash_value.len() + 1 + suffix.len());
    out.extend_from_slice(hash_value.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(suffix);
    out
}

impl KeyCodec for LegacyCodec {
    fn scheme(&self) -> KeyScheme {
        KeyScheme::Legacy
    }

    fn encode(&self, hash_value: &str, range_value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (composite_key(hash_value, range_value), COLUMN.to_vec())
    }

    fn plan(&self, query: &IndexQuery) -> ReadPlan {
        planner::plan_legacy(query)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnKeyCodec;

impl ColumnKeyCodec {
    /// Recover the range value from a `family:qualifier` column name.
    pub fn range_value(column: &[u8]) -> &[u8] {
        column
            .strip_prefix(COLUMN_PREFIX.as_bytes())
            .unwrap_or(column)
    }
}

impl KeyCodec for ColumnKeyCodec {
    fn scheme(&self) -> KeyScheme {
        KeyScheme::ColumnKey
    }

    fn encode(&self, hash_value: &str, range_value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (hash_value.as_bytes().to_vec(), range_value.to_vec())
    }

    fn plan(&self, query: &IndexQuery) -> ReadPlan {
        planner::plan_column_key(query)
    }
}
