//! Runtime configuration for the index client.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::keys::{KeyCodec, KeyScheme};

/// Default number of rows fetched by one multi-row read.
pub const DEFAULT_MAX_ROW_READS: usize = 100;
/// Default cap on concurrent single-query reads for the legacy layout.
pub const DEFAULT_QUERY_PARALLELISM: usize = 100;
/// No deadline by default; callers bound calls from outside.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexClientConfig {
    /// Store project identifier.
    pub project: String,
    /// Store instance identifier.
    pub instance: String,
    /// Selects the column-key layout instead of legacy composite rows.
    /// Fixed for the lifetime of a client; a table never mixes layouts.
    pub column_key: bool,
    /// Upper bound on rows per multi-row read request.
    pub max_row_reads: usize,
    /// Upper bound on in-flight single-query reads (legacy layout).
    pub query_parallelism: usize,
    /// Root directory for the local fjall-backed store.
    pub data_dir: PathBuf,
    /// Optional deadline for each physical store call in milliseconds.
    /// `0` (the default) leaves calls unbounded.
    pub request_timeout_ms: u64,
}

impl Default for IndexClientConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            instance: String::new(),
            column_key: false,
            max_row_reads: DEFAULT_MAX_ROW_READS,
            query_parallelism: DEFAULT_QUERY_PARALLELISM,
            data_dir: PathBuf::from("./holo-index-data"),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl IndexClientConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            project: std::env::var("HOLO_INDEX_PROJECT").unwrap_or(defaults.project),
            instance: std::env::var("HOLO_INDEX_INSTANCE").unwrap_or(defaults.instance),
            column_key: parse_bool(
                std::env::var("HOLO_INDEX_COLUMN_KEY").ok(),
                defaults.column_key,
            )?,
            max_row_reads: parse_usize(
                std::env::var("HOLO_INDEX_MAX_ROW_READS").ok(),
                defaults.max_row_reads,
            )?,
            query_parallelism: parse_usize(
                std::env::var("HOLO_INDEX_QUERY_PARALLELISM").ok(),
                defaults.query_parallelism,
            )?,
            data_dir: std::env::var_os("HOLO_INDEX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            request_timeout_ms: parse_u64(
                std::env::var("HOLO_INDEX_REQUEST_TIMEOUT_MS").ok(),
                defaults.request_timeout_ms,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_row_reads > 0, "max_row_reads must be positive");
        anyhow::ensure!(
            self.query_parallelism > 0,
            "query_parallelism must be positive"
        );
        Ok(())
    }

    pub fn key_scheme(&self) -> KeyScheme {
        if self.column_key {
            KeyScheme::ColumnKey
        } else {
            KeyScheme::Legacy
        }
    }

    pub fn key_codec(&self) -> &'static dyn KeyCodec {
        self.key_scheme().codec()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Directory holding the local store for this project/instance pair.
    pub fn store_dir(&self) -> PathBuf {
        let mut dir = self.data_dir.clone();
        if !self.project.is_empty() {
            dir.push(&self.project);
        }
        if !self.instance.is_empty() {
            dir.push(&self.instance);
        }
        dir
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default_value),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(raw) => anyhow::bail!("invalid bool value: {raw}"),
    }
}
