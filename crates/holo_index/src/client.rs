//! Index client: writes index entries and answers index queries against a
//! wide-column store, under either key layout.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn, Instrument};

use crate::config::IndexClientConfig;
use crate::error::IndexError;
use crate::fjall_store::FjallStore;
use crate::keys::{KeyCodec, KeyScheme, COLUMN_FAMILY};
use crate::parallel::{do_parallel_queries, query_filter};
use crate::planner::ReadPlan;
use crate::read_batch::{ColumnKeyBatch, RowBatch};
use crate::schema::{BatchCallback, IndexQuery, QueryCallback, ReadBatch};
use crate::store::{with_deadline, ReadFilter, ReadItem, Row, RowSet, WideColumnStore, WideColumnTable};
use crate::write_batch::WriteBatch;

/// Queries that resolve to the same physical row of one table.
type RowQueries<'q> = BTreeMap<Vec<u8>, Vec<&'q IndexQuery>>;

pub struct IndexClient {
    config: IndexClientConfig,
    store: Arc<dyn WideColumnStore>,
    codec: &'static dyn KeyCodec,
}

impl IndexClient {
    pub fn new(config: IndexClientConfig, store: Arc<dyn WideColumnStore>) -> Result<Self> {
        config.validate()?;
        let codec = config.key_codec();
        debug!(scheme = %codec.scheme(), project = %config.project, instance = %config.instance, "index client ready");
        Ok(Self {
            config,
            store,
            codec,
        })
    }

    /// Client over a fjall store at `data_dir/<project>/<instance>`.
    pub fn open_fjall(config: IndexClientConfig) -> Result<Self> {
        let store = FjallStore::open_dir(config.store_dir())?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &IndexClientConfig {
        &self.config
    }

    pub fn scheme(&self) -> KeyScheme {
        self.codec.scheme()
    }

    pub fn store(&self) -> &Arc<dyn WideColumnStore> {
        &self.store
    }

    pub fn new_write_batch(&self) -> WriteBatch {
        WriteBatch::new(self.codec)
    }

    pub async fn batch_write(&self, batch: WriteBatch) -> Result<()> {
        batch
            .commit(self.store.as_ref(), self.config.request_timeout())
            .await
    }

    /// Release the client, flushing the store.
    pub fn stop(&self) -> Result<()> {
        self.store.close()
    }

    /// Run one logical query. `callback` sees every matching result; an empty
    /// result invokes it zero times.
    pub async fn query(&self, query: &IndexQuery, callback: &mut BatchCallback<'_>) -> Result<()> {
        let span = tracing::debug_span!(
            "query",
            table = %query.table_name,
            hash_value = %query.hash_value
        );
        let res = self.query_one(query, callback).instrument(span).await;
        if let Err(err) = &res {
            warn!(table = %query.table_name, hash_value = %query.hash_value, error = ?err, "index query failed");
        }
        res
    }

    async fn query_one(&self, query: &IndexQuery, callback: &mut BatchCallback<'_>) -> Result<()> {
        let table = self
            .store
            .open(&query.table_name)
            .with_context(|| format!("open table {}", query.table_name))?;
        let deadline = self.config.request_timeout();

        match self.codec.plan(query) {
            ReadPlan::SingleRow { row_key, filter } => {
                let row = with_deadline(
                    deadline,
                    format!("read_row on {}", query.table_name),
                    table.read_row(&row_key, &filter),
                )
                .await
                .with_context(|| format!("read index row from {}", query.table_name))?;

                let items: Vec<ReadItem> = row
                    .into_family(COLUMN_FAMILY)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|item| query.value_matches(&item.value))
                    .collect();
                if items.is_empty() {
                    return Ok(());
                }
                let batch = ColumnKeyBatch::new(items);
                let batch: &dyn ReadBatch = &batch;
                callback(batch);
                Ok(())
            }
            ReadPlan::RowRange { range, filter } => {
                let mut fault: Option<IndexError> = None;
                let mut on_row = |row: Row| -> bool {
                    let batch = match RowBatch::new(row) {
                        Ok(batch) => batch,
                        Err(err) => {
                            fault = Some(err);
                            return false;
                        }
                    };
                    if !query.value_matches(batch.value()) {
                        return true;
                    }
                    let batch: &dyn ReadBatch = &batch;
                    callback(batch)
                };
                with_deadline(
                    deadline,
                    format!("read_rows on {}", query.table_name),
                    table.read_rows(RowSet::Range(range), &filter, &mut on_row),
                )
                .await
                .with_context(|| format!("scan index rows in {}", query.table_name))?;

                match fault {
                    Some(err) => Err(err.into()),
                    None => Ok(()),
                }
            }
        }
    }

    /// Run many logical queries. `callback` is invoked with the originating
    /// query for every batch of results. Every read runs to completion; the
    /// first error to complete is returned.
    ///
    /// Reads are polled together on the caller's task, so they only overlap
    /// when the store yields while reading (as `FjallStore` does).
    pub async fn query_pages(&self, queries: &[IndexQuery], callback: &QueryCallback<'_>) -> Result<()> {
        let span = tracing::debug_span!("query_pages", queries = queries.len(), scheme = %self.scheme());
        async {
            match self.scheme() {
                KeyScheme::Legacy => self.legacy_query_pages(queries, callback).await,
                KeyScheme::ColumnKey => self.column_key_query_pages(queries, callback).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn legacy_query_pages<'a>(
        &'a self,
        queries: &'a [IndexQuery],
        callback: &'a QueryCallback<'a>,
    ) -> Result<()> {
        do_parallel_queries(
            queries,
            self.config.query_parallelism,
            move |query, mut per_query| async move { self.query(query, &mut *per_query).await },
            callback,
        )
        .await
    }

    async fn column_key_query_pages(&self, queries: &[IndexQuery], callback: &QueryCallback<'_>) -> Result<()> {
        let callback = query_filter(callback);

        let mut by_table: BTreeMap<&str, RowQueries<'_>> = BTreeMap::new();
        for query in queries {
            by_table
                .entry(query.table_name.as_str())
                .or_default()
                .entry(query.hash_value.as_bytes().to_vec())
                .or_default()
                .push(query);
        }

        let page_size = self.config.max_row_reads;
        let mut pages = FuturesUnordered::new();
        for (&table_name, rows) in &by_table {
            let table = self
                .store
                .open(table_name)
                .with_context(|| format!("open table {table_name}"))?;
            let keys: Vec<Vec<u8>> = rows.keys().cloned().collect();
            debug!(
                table = %table_name,
                rows = keys.len(),
                pages = keys.len().div_ceil(page_size),
                "reading index pages"
            );
            for page in keys.chunks(page_size) {
                pages.push(self.read_page(table.clone(), page.to_vec(), rows, &callback));
            }
        }

        let mut first_err: Option<anyhow::Error> = None;
        while let Some(res) = pages.next().await {
            if let Err(err) = res {
                warn!(error = ?err, "index page read failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read one page of rows and hand every row to the queries that asked
    /// for it. A `false` from the callback stops this page only.
    async fn read_page(
        &self,
        table: Arc<dyn WideColumnTable>,
        keys: Vec<Vec<u8>>,
        rows: &RowQueries<'_>,
        callback: &QueryCallback<'_>,
    ) -> Result<()> {
        let filter = ReadFilter::family(COLUMN_FAMILY);
        let mut fault: Option<IndexError> = None;
        let mut on_row = |row: Row| -> bool {
            let Some(queries) = rows.get(row.key()) else {
                fault = Some(IndexError::UnknownRow {
                    table: table.name().to_string(),
                    row_key: row.key().to_vec(),
                });
                return false;
            };
            // A row without the index family holds nothing for these queries.
            let Some(items) = row.into_family(COLUMN_FAMILY) else {
                return true;
            };
            let batch = ColumnKeyBatch::new(items);
            let batch: &dyn ReadBatch = &batch;
            let mut keep_going = true;
            for &query in queries {
                keep_going &= callback(query, batch);
            }
            keep_going
        };

        with_deadline(
            self.config.request_timeout(),
            format!("read_rows on {}", table.name()),
            table.read_rows(RowSet::Keys(keys), &filter, &mut on_row),
        )
        .await
        .with_context(|| format!("read index page from {}", table.name()))?;

        match fault {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for IndexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexClient")
            .field("config", &self.config)
            .field("scheme", &self.scheme())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::keys::composite_key;
    use crate::schema::collect_batch;
    use crate::store::{MemoryStore, Mutation};

    fn client(column_key: bool, store: &MemoryStore) -> IndexClient {
        let config = IndexClientConfig {
            column_key,
            ..IndexClientConfig::default()
        };
        IndexClient::new(config, Arc::new(store.clone())).expect("client")
    }

    async fn collect(client: &IndexClient, query: &IndexQuery) -> Vec<(Vec<u8>, Vec<u8>)> {
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

    #[tokio::test]
    async fn single_query_round_trips_under_both_layouts() {
        for column_key in [false, true] {
            let store = MemoryStore::new();
            let client = client(column_key, &store);
            let mut batch = client.new_write_batch();
            batch.add("T", "A", &[0x01], b"x");
            client.batch_write(batch).await.expect("write");

            let got = collect(&client, &IndexQuery::new("T", "A")).await;
            assert_eq!(got, vec![(vec![0x01], b"x".to_vec())], "column_key={column_key}");
            assert!(collect(&client, &IndexQuery::new("T", "B")).await.is_empty());
        }
    }

    #[tokio::test]
    async fn empty_single_row_result_skips_callback() {
        let store = MemoryStore::new();
        let client = client(true, &store);
        let mut batch = client.new_write_batch();
        batch.add("T", "A", &[0x01], b"x");
        client.batch_write(batch).await.expect("write");

        let mut calls = 0;
        client
            .query(
                &IndexQuery::new("T", "A").with_value_equal(b"nope".to_vec()),
                &mut |_: &dyn ReadBatch| {
                    calls += 1;
                    true
                },
            )
            .await
            .expect("query");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn legacy_cardinality_fault_is_fatal() {
        let store = MemoryStore::new();
        let table = store.open("T").expect("open");
        let mut mutation = Mutation::new();
        mutation.set(COLUMN_FAMILY, b"c".to_vec(), b"x".to_vec());
        mutation.set(COLUMN_FAMILY, b"d".to_vec(), b"y".to_vec());
        table
            .apply_bulk(vec![(composite_key("A", &[1]), mutation)])
            .await
            .expect("apply");

        let client = client(false, &store);
        let mut delivered = 0;
        let err = client
            .query(&IndexQuery::new("T", "A"), &mut |_: &dyn ReadBatch| {
                delivered += 1;
                true
            })
            .await
            .expect_err("two columns in a legacy row");
        assert!(crate::error::is_fatal(&err));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn several_queries_on_one_hash_each_get_the_row() {
        let store = MemoryStore::new();
        let client = client(true, &store);
        let mut batch = client.new_write_batch();
        batch.add("T", "A", &[1], b"x");
        batch.add("T", "A", &[2], b"y");
        client.batch_write(batch).await.expect("write");

        let queries = vec![
            IndexQuery::new("T", "A").with_prefix(vec![1]),
            IndexQuery::new("T", "A").with_start(vec![2]),
        ];
        let seen = Mutex::new(Vec::new());
        let callback = |query: &IndexQuery, batch: &dyn ReadBatch| {
            seen.lock()
                .expect("lock")
                .push((query.clone(), collect_batch(batch)));
            true
        };
        client.query_pages(&queries, &callback).await.expect("query pages");

        let mut seen = seen.into_inner().expect("lock");
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, queries[0]);
        assert_eq!(seen[0].1, vec![(vec![1], b"x".to_vec())]);
        assert_eq!(seen[1].0, queries[1]);
        assert_eq!(seen[1].1, vec![(vec![2], b"y".to_vec())]);
    }
}
