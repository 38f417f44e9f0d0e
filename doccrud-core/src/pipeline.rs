//! Concurrent per-record post-processing.
//!
//! Fetched records are enriched concurrently, one future per record. The batch succeeds only
//! if every record does: a single failure fails the call, and no enriched records are
//! returned.

use std::future::Future;

use futures::future::join_all;
use tracing::warn;

use crate::error::{BatchError, CrudError, CrudResult};

/// Runs `enrich` over every record of `records` concurrently and waits for all of them.
///
/// Output order matches input order.
///
/// # Errors
///
/// Returns [`CrudError::PostProcessing`] listing every failed record when any enrichment fails.
pub async fn post_process_batch<T, R, F, Fut>(records: Vec<T>, enrich: F) -> CrudResult<Vec<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = CrudResult<R>>,
{
    let total = records.len();
    let results = join_all(records.into_iter().map(enrich)).await;

    let mut enriched = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(record) => enriched.push(record),
            Err(err) => failures.push((index, err.to_string())),
        }
    }

    if failures.is_empty() {
        Ok(enriched)
    } else {
        warn!(failed = failures.len(), total, "post processing failed");

        Err(CrudError::PostProcessing(BatchError { total, failures }))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn enriches_every_record_in_order() -> anyhow::Result<()> {
        let out = post_process_batch(vec![1, 2, 3], |n| async move { Ok(n * 10) }).await?;

        assert_eq!(out, vec![10, 20, 30]);
        Ok(())
    }

    #[tokio::test]
    async fn one_failure_fails_batch_after_all_ran() {
        let ran = Arc::new(AtomicUsize::new(0));

        let result = post_process_batch(vec![1u64, 2, 3, 4, 5], |n| {
            let ran = ran.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5 * (6 - n))).await;
                ran.fetch_add(1, Ordering::SeqCst);

                if n == 3 { Err(CrudError::Blob(format!("cannot sign record {n}"))) } else { Ok(n) }
            }
        })
        .await;

        let Err(CrudError::PostProcessing(batch)) = result else {
            panic!("expected aggregate error");
        };
        assert_eq!(batch.total, 5);
        assert_eq!(batch.failures, vec![(2, "Blob store error: cannot sign record 3".to_string())]);
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn records_run_concurrently() -> anyhow::Result<()> {
        let started = std::time::Instant::now();

        post_process_batch(vec![(); 10], |()| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await?;

        assert!(started.elapsed() < Duration::from_millis(400));
        Ok(())
    }

    #[tokio::test]
    async fn empty_batch_is_ok() -> anyhow::Result<()> {
        let out: Vec<u8> = post_process_batch(Vec::<u8>::new(), |n| async move { Ok(n) }).await?;

        assert!(out.is_empty());
        Ok(())
    }
}
