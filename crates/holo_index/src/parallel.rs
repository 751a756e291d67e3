//! Generic helpers for running many index queries.
//!
//! `do_parallel_queries` drives one single-query read per logical query with
//! a cap on how many are in flight. `query_filter` wraps a callback so every
//! batch it sees is re-filtered against the query's own bounds, for readers
//! that fetch more than the query asked for.

use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::read_batch::FilteringBatch;
use crate::schema::{BatchCallback, IndexQuery, QueryCallback, ReadBatch};

/// Run `do_single_query` for every query, at most `parallelism` at a time.
///
/// Every query runs to completion even after a failure. The first error to
/// complete is returned; later ones are logged and dropped.
pub async fn do_parallel_queries<'a, F, Fut>(
    queries: &'a [IndexQuery],
    parallelism: usize,
    do_single_query: F,
    callback: &'a QueryCallback<'a>,
) -> anyhow::Result<()>
where
    F: Fn(&'a IndexQuery, Box<BatchCallback<'a>>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + 'a,
{
    let launch = |query: &'a IndexQuery| {
        let per_query: Box<BatchCallback<'a>> =
            Box::new(move |batch: &dyn ReadBatch| callback(query, batch));
        do_single_query(query, per_query)
    };

    if let [query] = queries {
        return launch(query).await;
    }

    let mut pending = queries.iter();
    let mut futs = FuturesUnordered::new();
    for query in pending.by_ref().take(parallelism.max(1)) {
        futs.push(launch(query));
    }

    let mut first_err: Option<anyhow::Error> = None;
    while let Some(res) = futs.next().await {
        if let Err(err) = res {
            if first_err.is_none() {
                first_err = Some(err);
            } else {
                tracing::debug!(error = ?err, "additional index query failed");
            }
        }
        if let Some(query) = pending.next() {
            futs.push(launch(query));
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Wrap `callback` so each batch only exposes items inside the query's
/// prefix/start bounds and matching its `value_equal`. Batches left empty by
/// the filter are not delivered.
pub fn query_filter<'a>(
    callback: &'a QueryCallback<'a>,
) -> impl Fn(&IndexQuery, &dyn ReadBatch) -> bool + Send + Sync + 'a {
    move |query: &IndexQuery, batch: &dyn ReadBatch| {
        let filtered = FilteringBatch::new(query, batch);
        if !filtered.iter().next() {
            return true;
        }
        callback(query, &filtered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::read_batch::ColumnKeyBatch;
    use crate::schema::collect_batch;
    use crate::store::Row;

    fn queries(n: usize) -> Vec<IndexQuery> {
        (0..n).map(|i| IndexQuery::new("t", format!("h{i}"))).collect()
    }

    #[tokio::test]
    async fn every_query_runs_and_parallelism_is_capped() {
        let queries = queries(25);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());
        let callback = |query: &IndexQuery, _batch: &dyn ReadBatch| {
            seen.lock().expect("lock").push(query.hash_value.clone());
            true
        };

        do_parallel_queries(
            &queries,
            4,
            |_query, mut cb| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    cb(&ColumnKeyBatch::default());
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            &callback,
        )
        .await
        .expect("parallel queries");

        let mut seen = seen.into_inner().expect("lock");
        seen.sort();
        let mut expected: Vec<_> = queries.iter().map(|q| q.hash_value.clone()).collect();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn failures_do_not_stop_remaining_queries() {
        let queries = queries(10);
        let ran = AtomicUsize::new(0);
        let callback = |_: &IndexQuery, _: &dyn ReadBatch| true;

        let err = do_parallel_queries(
            &queries,
            3,
            |query, _cb| {
                let ran = &ran;
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if query.hash_value == "h2" || query.hash_value == "h7" {
                        anyhow::bail!("boom {}", query.hash_value);
                    }
                    Ok(())
                }
            },
            &callback,
        )
        .await
        .expect_err("two queries fail");

        assert!(err.to_string().starts_with("boom h"));
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn query_filter_drops_empty_batches() {
        let mut row = Row::new(b"A".to_vec());
        row.push("f", &[1], b"v".to_vec());
        row.push("f", &[2], b"w".to_vec());
        let batch = ColumnKeyBatch::new(row.into_family("f").expect("family"));
        let batch: &dyn ReadBatch = &batch;

        let delivered = Mutex::new(Vec::new());
        let callback = |_: &IndexQuery, batch: &dyn ReadBatch| {
            delivered.lock().expect("lock").push(collect_batch(batch));
            true
        };
        let filtered = query_filter(&callback);

        assert!(filtered(&IndexQuery::new("t", "A").with_value_equal(b"w".to_vec()), batch));
        assert!(filtered(&IndexQuery::new("t", "A").with_prefix(vec![9]), batch));
        drop(filtered);

        let delivered = delivered.into_inner().expect("lock");
        assert_eq!(delivered, vec![vec![(vec![2], b"w".to_vec())]]);
    }
}
