//! Minimal admin client for a local fjall-backed index store.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use holo_index::{IndexClient, IndexClientConfig, IndexQuery, ReadBatch};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "holo-index")]
#[command(about = "Write and query index entries in a local store", long_about = None)]
struct Args {
    /// Store root; overrides HOLO_INDEX_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Use the column-key layout; overrides HOLO_INDEX_COLUMN_KEY.
    #[arg(long, default_value_t = false)]
    column_key: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write one index entry.
    Put {
        #[arg(long)]
        table: String,
        #[arg(long)]
        hash: String,
        /// Range value as hex bytes (no 0x prefix).
        #[arg(long)]
        range: String,
        /// Value as UTF-8 text.
        #[arg(long)]
        value: String,
        /// Interpret the value as hex bytes.
        #[arg(long, default_value_t = false)]
        hex: bool,
    },
    /// Read the entries of one hash value.
    Query {
        #[arg(long)]
        table: String,
        #[arg(long)]
        hash: String,
        /// Range value prefix as hex bytes.
        #[arg(long)]
        prefix: Option<String>,
        /// Inclusive range value lower bound as hex bytes.
        #[arg(long)]
        start: Option<String>,
        /// Only return entries whose value equals this UTF-8 text.
        #[arg(long)]
        value_equal: Option<String>,
    },
    /// Read the entries of several hash values in one call.
    Scan {
        #[arg(long)]
        table: String,
        #[arg(long = "hash", required = true)]
        hashes: Vec<String>,
    },
}

#[derive(Serialize)]
struct EntryView {
    hash: String,
    range: String,
    value: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("holo_index=info,warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = IndexClientConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    config.column_key |= args.column_key;
    let client = IndexClient::open_fjall(config)?;

    match args.command {
        Command::Put {
            table,
            hash,
            range,
            value,
            hex,
        } => {
            let range = parse_hex(&range).context("invalid --range")?;
            let value = if hex {
                parse_hex(&value).context("invalid --value")?
            } else {
                value.into_bytes()
            };
            let mut batch = client.new_write_batch();
            batch.add(&table, &hash, &range, &value);
            client.batch_write(batch).await?;
            println!("ok");
        }
        Command::Query {
            table,
            hash,
            prefix,
            start,
            value_equal,
        } => {
            let mut query = IndexQuery::new(table, hash.clone());
            if let Some(prefix) = prefix {
                query = query.with_prefix(parse_hex(&prefix).context("invalid --prefix")?);
            }
            if let Some(start) = start {
                query = query.with_start(parse_hex(&start).context("invalid --start")?);
            }
            if let Some(value) = value_equal {
                query = query.with_value_equal(value.into_bytes());
            }
            let mut entries = Vec::new();
            client
                .query(&query, &mut |batch: &dyn ReadBatch| {
                    push_entries(&mut entries, &hash, batch);
                    true
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Scan { table, hashes } => {
            let queries: Vec<IndexQuery> = hashes
                .iter()
                .map(|hash| IndexQuery::new(table.clone(), hash.clone()))
                .collect();
            let entries = std::sync::Mutex::new(Vec::new());
            client
                .query_pages(&queries, &|query: &IndexQuery, batch: &dyn ReadBatch| {
                    if let Ok(mut entries) = entries.lock() {
                        push_entries(&mut entries, &query.hash_value, batch);
                    }
                    true
                })
                .await?;
            let mut entries = entries
                .into_inner()
                .map_err(|_| anyhow::anyhow!("result lock poisoned"))?;
            entries.sort_by(|a, b| (&a.hash, &a.range).cmp(&(&b.hash, &b.range)));
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    client.stop()
}

fn push_entries(out: &mut Vec<EntryView>, hash: &str, batch: &dyn ReadBatch) {
    let mut iter = batch.iter();
    while iter.next() {
        out.push(EntryView {
            hash: hash.to_string(),
            range: hex::encode(iter.range_value()),
            value: String::from_utf8_lossy(iter.value()).into_owned(),
        });
    }
}

fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(input).with_context(|| format!("bad hex value {input:?}"))
}
