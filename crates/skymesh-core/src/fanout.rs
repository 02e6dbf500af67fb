//! Bounded scatter→gather.
//!
//! Every parallel fan-out in the orchestrator (shared-resource
//! reservation, VM creation, status reconciliation, rollback) goes
//! through [`for_each_bounded`] so the concurrency cap against the CSPs
//! is enforced in exactly one place.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Hard cap on concurrent workers talking to a CSP.
pub const MAX_CONCURRENCY: usize = 10;

/// Run `f` over every item with at most `max_concurrency` workers in
/// flight, returning the results in input order.
///
/// Workers do not share mutable state; each returns its result through
/// the join set and the caller gathers them here. A panicking worker
/// propagates its panic to the caller.
pub async fn for_each_bounded<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrency: usize,
    f: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut workers = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        // The future is built eagerly but does not run until it holds a
        // permit inside its worker task.
        let work = f(index, item);
        workers.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (index, work.await)
        });
    }

    let mut slots: Vec<Option<R>> = Vec::new();
    slots.resize_with(workers.len(), || None);

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) if err.is_panic() => {
                std::panic::resume_unwind(err.into_panic())
            }
            Err(_) => {}
        }
    }

    slots.into_iter().flatten().collect()
}
