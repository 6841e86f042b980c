//! Bounded concurrent fetch-and-parse of product links.

use std::future::Future;
use std::sync::Arc;

use marketcrawl_shared::{ProductRecord, ProxyIdentity};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::proxy::ProxyRotator;
use crate::stop::StopSignal;

/// Hard upper bound on concurrently running fetch tasks.
pub const MAX_WORKERS: usize = 12;

/// One product link to fetch, with the proxy chosen for it at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub link: String,
    pub proxy: Option<ProxyIdentity>,
}

/// Runs fetch tasks for a batch of links with at most `workers` in flight.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    workers: usize,
}

impl Dispatcher {
    /// `requested` is clamped to `1..=MAX_WORKERS`.
    pub fn new(requested: usize) -> Self {
        Self {
            workers: requested.clamp(1, MAX_WORKERS),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch every link through `fetch`, returning the records that parsed.
    ///
    /// Each link gets the next proxy from `rotator` when its task is
    /// submitted. Failed or panicked tasks are dropped without affecting the
    /// others. Once `stop` is observed no new task starts, tasks already
    /// running are awaited, and their results are discarded.
    #[instrument(skip_all, fields(links = links.len(), workers = self.workers))]
    pub async fn run<F, Fut>(
        &self,
        links: Vec<String>,
        rotator: &mut ProxyRotator,
        stop: &StopSignal,
        fetch: F,
    ) -> Vec<ProductRecord>
    where
        F: Fn(FetchJob) -> Fut,
        Fut: Future<Output = Option<ProductRecord>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        for link in links {
            while let Some(joined) = tasks.try_join_next() {
                tally.absorb(joined, stop);
            }
            if stop.is_stopped() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = stop.stopped() => break,
            };

            let job = FetchJob {
                link,
                proxy: rotator.next_proxy(),
            };
            tally.submitted += 1;
            let task = fetch(job);
            tasks.spawn(async move {
                let _permit = permit;
                task.await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            tally.absorb(joined, stop);
        }

        if stop.is_stopped() {
            info!(
                submitted = tally.submitted,
                kept = tally.records.len(),
                discarded = tally.discarded,
                "dispatch stopped"
            );
        } else {
            info!(
                submitted = tally.submitted,
                parsed = tally.records.len(),
                failed = tally.failed,
                "dispatch finished"
            );
        }
        tally.records
    }
}

#[derive(Default)]
struct Tally {
    records: Vec<ProductRecord>,
    submitted: usize,
    failed: usize,
    discarded: usize,
}

impl Tally {
    fn absorb(&mut self, joined: Result<Option<ProductRecord>, JoinError>, stop: &StopSignal) {
        if stop.is_stopped() {
            self.discarded += 1;
            return;
        }
        match joined {
            Ok(Some(record)) => self.records.push(record),
            Ok(None) => {
                self.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "fetch task panicked");
                self.failed += 1;
            }
        }
        debug!(parsed = self.records.len(), failed = self.failed, "task joined");
    }
}
