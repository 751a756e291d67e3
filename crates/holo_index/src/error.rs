//! Typed error kinds raised by the index client.
//!
//! Most failures travel as `anyhow::Error`; the variants here are the ones
//! callers may want to inspect with `downcast_ref::<IndexError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The store returned a row that no query in the current set asked for.
    #[error("got row for unknown index query: table={table} row_key={}", render_key(row_key))]
    UnknownRow { table: String, row_key: Vec<u8> },

    /// A legacy composite row did not carry exactly one column under the
    /// index family. Returning any value from such a row would be a guess.
    #[error(
        "bad response from store: row {} has {columns} columns under the index family, expected 1",
        render_key(row_key)
    )]
    UnexpectedColumns { row_key: Vec<u8>, columns: usize },

    /// Table name rejected by the storage adapter.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
}

impl IndexError {
    /// Fatal errors indicate the read path's own invariants were broken.
    /// Callers should treat them as crash-and-restart conditions.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnexpectedColumns { .. })
    }
}

/// Returns true if `err` (or anything it wraps) is a fatal [`IndexError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<IndexError>())
        .any(IndexError::is_fatal)
}

fn render_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).escape_debug().to_string()
}
