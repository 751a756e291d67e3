//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use holo_index::store::{Mutation, ReadFilter, Row, RowSet};
use holo_index::{
    collect_batch, IndexClient, IndexClientConfig, IndexQuery, MemoryStore, ReadBatch,
    WideColumnStore, WideColumnTable,
};

/// Upper bound for any single test call; a hang past this is a leak.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Faults {
    failing_writes: Mutex<HashSet<(String, Vec<u8>)>>,
    failing_reads: Mutex<HashSet<Vec<u8>>>,
    read_delay: Mutex<Option<Duration>>,
    stray_row: Mutex<Option<Vec<u8>>>,
    reverse_reads: AtomicBool,
    read_calls: AtomicUsize,
}

/// Memory store wrapper that injects per-row write failures, read failures,
/// read latency, reordered results and rows nobody asked for.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Writes of `row_key` in `table` report a per-row error and are not applied.
    pub fn fail_row_write(&self, table: &str, row_key: &[u8]) {
        self.faults
            .failing_writes
            .lock()
            .expect("lock")
            .insert((table.to_string(), row_key.to_vec()));
    }

    /// Any multi-row read that requests `row_key` fails.
    pub fn fail_read_of(&self, row_key: &[u8]) {
        self.faults
            .failing_reads
            .lock()
            .expect("lock")
            .insert(row_key.to_vec());
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.faults.read_delay.lock().expect("lock") = Some(delay);
    }

    /// Every multi-row read also returns a row with this key.
    pub fn inject_row(&self, row_key: &[u8]) {
        *self.faults.stray_row.lock().expect("lock") = Some(row_key.to_vec());
    }

    /// Multi-row reads return their rows in descending key order.
    pub fn reverse_reads(&self) {
        self.faults.reverse_reads.store(true, Ordering::SeqCst);
    }

    pub fn read_calls(&self) -> usize {
        self.faults.read_calls.load(Ordering::SeqCst)
    }
}

impl WideColumnStore for FaultyStore {
    fn open(&self, table: &str) -> anyhow::Result<Arc<dyn WideColumnTable>> {
        Ok(Arc::new(FaultyTable {
            name: table.to_string(),
            inner: self.inner.open(table)?,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultyTable {
    name: String,
    inner: Arc<dyn WideColumnTable>,
    faults: Arc<Faults>,
}

impl FaultyTable {
    fn should_fail_read(&self, rows: &RowSet) -> bool {
        let failing = self.faults.failing_reads.lock().expect("lock");
        match rows {
            RowSet::Keys(keys) => keys.iter().any(|key| failing.contains(key)),
            RowSet::Range(_) => false,
        }
    }

    fn read_delay(&self) -> Option<Duration> {
        *self.faults.read_delay.lock().expect("lock")
    }

    fn stray_row(&self) -> Option<Vec<u8>> {
        self.faults.stray_row.lock().expect("lock").clone()
    }
}

#[async_trait]
impl WideColumnTable for FaultyTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply_bulk(
        &self,
        rows: Vec<(Vec<u8>, Mutation)>,
    ) -> anyhow::Result<Vec<Option<anyhow::Error>>> {
        let failing: Vec<bool> = {
            let failing = self.faults.failing_writes.lock().expect("lock");
            rows.iter()
                .map(|(key, _)| failing.contains(&(self.name.clone(), key.clone())))
                .collect()
        };
        let mut passed = Vec::new();
        for ((key, mutation), fail) in rows.into_iter().zip(&failing) {
            if !fail {
                passed.push((key, mutation));
            }
        }
        let mut applied = self.inner.apply_bulk(passed).await?.into_iter();
        Ok(failing
            .iter()
            .map(|fail| {
                if *fail {
                    Some(anyhow::anyhow!("injected row write failure"))
                } else {
                    applied.next().flatten()
                }
            })
            .collect())
    }

    async fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> anyhow::Result<Row> {
        self.faults.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_read(&RowSet::Keys(vec![row_key.to_vec()])) {
            anyhow::bail!("injected read failure");
        }
        if let Some(delay) = self.read_delay() {
            tokio::time::sleep(delay).await;
        }
        self.inner.read_row(row_key, filter).await
    }

    async fn read_rows(
        &self,
        rows: RowSet,
        filter: &ReadFilter,
        on_row: &mut (dyn FnMut(Row) -> bool + Send),
    ) -> anyhow::Result<()> {
        self.faults.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_read(&rows) {
            anyhow::bail!("injected read failure");
        }
        if let Some(delay) = self.read_delay() {
            tokio::time::sleep(delay).await;
        }
        if let Some(key) = self.stray_row() {
            let mut row = Row::new(key);
            row.push("f", b"\x01", b"stray".to_vec());
            if !on_row(row) {
                return Ok(());
            }
        }
        if !self.faults.reverse_reads.load(Ordering::SeqCst) {
            return self.inner.read_rows(rows, filter, on_row).await;
        }
        let mut buffered = Vec::new();
        self.inner
            .read_rows(rows, filter, &mut |row: Row| {
                buffered.push(row);
                true
            })
            .await?;
        for row in buffered.into_iter().rev() {
            if !on_row(row) {
                break;
            }
        }
        Ok(())
    }
}

pub fn config(column_key: bool) -> IndexClientConfig {
    IndexClientConfig {
        column_key,
        ..IndexClientConfig::default()
    }
}

pub fn client(column_key: bool, store: &FaultyStore) -> IndexClient {
    IndexClient::new(config(column_key), Arc::new(store.clone())).expect("create client")
}

/// Write `(table, hash, range, value)` entries in one batch.
pub async fn write(client: &IndexClient, entries: &[(&str, &str, Vec<u8>, &str)]) {
    let mut batch = client.new_write_batch();
    for (table, hash, range, value) in entries {
        batch.add(table, hash, range, value.as_bytes());
    }
    client.batch_write(batch).await.expect("batch write");
}

/// Results of a single query as `(range, value)` pairs.
pub async fn query_all(client: &IndexClient, query: &IndexQuery) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    client
        .query(query, &mut |batch: &dyn ReadBatch| {
            out.extend(collect_batch(batch));
            true
        })
        .await
        .expect("query");
    out
}

/// Results of a multi-query read as `(hash, range, value)`, sorted.
pub async fn query_pages_all(
    client: &IndexClient,
    queries: &[IndexQuery],
) -> anyhow::Result<Vec<(String, Vec<u8>, Vec<u8>)>> {
    let out = Mutex::new(Vec::new());
    let callback = |query: &IndexQuery, batch: &dyn ReadBatch| {
        let mut out = out.lock().expect("lock");
        for (range, value) in collect_batch(batch) {
            out.push((query.hash_value.clone(), range, value));
        }
        true
    };
    client.query_pages(queries, &callback).await?;
    let mut out = out.into_inner().expect("lock");
    out.sort();
    Ok(out)
}
