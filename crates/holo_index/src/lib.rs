//! Index-entry storage over a sorted wide-column store.
//!
//! Index entries are `(table, hash value, range value) -> value` tuples. They
//! are written in batches and read back by hash value, optionally scoped by a
//! range-value prefix or lower bound and filtered by exact value.
//!
//! Two physical layouts are supported and selected once per client:
//! - legacy composite rows, one physical row per entry;
//! - column keys, one physical row per hash value with one column per entry.
//!
//! The physical store sits behind [`store::WideColumnStore`]. This crate ships
//! an in-memory implementation and a persistent one over fjall.

pub mod client;
pub mod config;
pub mod error;
pub mod fjall_store;
pub mod keys;
pub mod parallel;
pub mod planner;
pub mod read_batch;
pub mod schema;
pub mod store;
pub mod write_batch;

pub use client::IndexClient;
pub use config::IndexClientConfig;
pub use error::{is_fatal, IndexError};
pub use fjall_store::FjallStore;
pub use keys::{ColumnKeyCodec, KeyCodec, KeyScheme, LegacyCodec};
pub use schema::{
    collect_batch, BatchCallback, IndexEntry, IndexQuery, QueryCallback, ReadBatch,
    ReadBatchIterator,
};
pub use store::{MemoryStore, WideColumnStore, WideColumnTable};
pub use write_batch::WriteBatch;
