//! Run controller: category → price ranges → links → products → export.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, instrument};

use marketcrawl_crawler::{
    ClientPool, Dispatcher, ProxyRotator, StopSignal, collect_links, estimate_catalog,
    fetch_and_parse, pause, plan_ranges,
};
use marketcrawl_shared::{
    CrawlConfig, MarketCrawlError, ProductRecord, Result, Row, RunId, RunParameters, RunStatus,
};

use crate::export::{Exporter, XlsxExporter, filename_ru};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Receives the running totals after every processed price range.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Overwrite the run's counts. An error aborts the run.
    async fn update(&self, run_id: &RunId, collected_links: u64, collected_items: u64)
    -> Result<()>;
}

/// Progress sink that discards every update.
pub struct NoopProgress;

#[async_trait]
impl ProgressStore for NoopProgress {
    async fn update(&self, _run_id: &RunId, _links: u64, _items: u64) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub status: RunStatus,
    pub collected_links: u64,
    pub collected_items: u64,
    /// Path of the exported workbook, when the export happened.
    pub filename: Option<PathBuf>,
    /// Message of the error that ended the run.
    pub error: Option<String>,
}

#[derive(Default)]
struct Collected {
    links: u64,
    records: Vec<ProductRecord>,
}

impl Collected {
    fn items(&self) -> u64 {
        self.records.len() as u64
    }
}

// ---------------------------------------------------------------------------
// RunController
// ---------------------------------------------------------------------------

/// Drives one run from its parameters to an exported file.
#[derive(Clone)]
pub struct RunController {
    config: CrawlConfig,
    data_dir: PathBuf,
    progress: Arc<dyn ProgressStore>,
    exporter: Arc<dyn Exporter>,
}

impl RunController {
    /// Controller exporting `.xlsx` files into `data_dir`, with progress discarded.
    pub fn new(config: CrawlConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            data_dir: data_dir.into(),
            progress: Arc::new(NoopProgress),
            exporter: Arc::new(XlsxExporter),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// Execute the run to a terminal state. Never returns `Running`.
    ///
    /// A stop request ends the crawl early but the records gathered so far
    /// are still exported. The run is `Stopped` only when one of the crawl's
    /// checkpoints saw the request; a stop arriving after the last range
    /// leaves it `Finished`. Errors end the run as `Error` with the counts
    /// reached up to that point and no export.
    #[instrument(skip_all, fields(run_id = %run_id, name = %params.name))]
    pub async fn run(&self, run_id: &RunId, params: &RunParameters, stop: &StopSignal) -> RunState {
        let start = Instant::now();
        let mut collected = Collected::default();

        let outcome = match self.crawl(run_id, params, stop, &mut collected).await {
            Ok(stopped) => self
                .export(&params.name, &collected.records)
                .await
                .map(|path| (path, stopped)),
            Err(e) => Err(e),
        };

        let state = match outcome {
            Ok((path, stopped)) => RunState {
                status: if stopped {
                    RunStatus::Stopped
                } else {
                    RunStatus::Finished
                },
                collected_links: collected.links,
                collected_items: collected.items(),
                filename: Some(path),
                error: None,
            },
            Err(e) => {
                error!(error = %e, "run failed");
                RunState {
                    status: RunStatus::Error,
                    collected_links: collected.links,
                    collected_items: collected.items(),
                    filename: None,
                    error: Some(e.to_string()),
                }
            }
        };

        info!(
            status = %state.status,
            links = state.collected_links,
            items = state.collected_items,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run ended"
        );
        state
    }

    async fn crawl(
        &self,
        run_id: &RunId,
        params: &RunParameters,
        stop: &StopSignal,
        collected: &mut Collected,
    ) -> Result<bool> {
        let proxies = params.parsed_proxies()?;
        let clients = ClientPool::new(&proxies, &self.config.user_agent)?;
        let mut rotator = ProxyRotator::new(proxies);
        let dispatcher = Dispatcher::new(params.max_workers);

        info!(
            categories = params.categories.len(),
            proxies = rotator.len(),
            workers = dispatcher.workers(),
            price_split = params.price_split,
            "run started"
        );

        // Set only where a checkpoint acts on the stop request.
        let mut stopped = false;

        for category in &params.categories {
            if stop.is_stopped() {
                info!("stop requested, skipping remaining categories");
                stopped = true;
                break;
            }

            let proxy = rotator.next_proxy();
            let estimate = estimate_catalog(&clients, proxy.as_ref(), &category.url, &self.config).await;
            let ranges = plan_ranges(estimate.total, category, params.price_split, &self.config);
            let max_pages = estimate
                .pages
                .map(|p| u32::try_from(p).unwrap_or(u32::MAX))
                .unwrap_or(self.config.fallback_pages);

            info!(
                url = %category.url,
                total = ?estimate.total,
                max_pages,
                ranges = ranges.len(),
                "category started"
            );

            for range in ranges {
                if stop.is_stopped() {
                    info!("stop requested, skipping remaining ranges");
                    stopped = true;
                    break;
                }

                let listing = range.apply_to(&category.url);
                let proxy = rotator.next_proxy();
                let links =
                    collect_links(&clients, proxy.as_ref(), &listing, Some(max_pages), &self.config)
                        .await;
                collected.links += links.len() as u64;

                let timeout = self.config.product_timeout;
                let batch = dispatcher
                    .run(links, &mut rotator, stop, |job| {
                        let clients = clients.clone();
                        async move {
                            let client = clients.client_for(job.proxy.as_ref());
                            fetch_and_parse(client, &job.link, timeout).await
                        }
                    })
                    .await;
                stopped |= stop.is_stopped();
                let parsed = batch.len();
                collected.records.extend(batch);

                self.progress
                    .update(run_id, collected.links, collected.items())
                    .await?;

                info!(
                    %range,
                    parsed,
                    links = collected.links,
                    items = collected.items(),
                    "range done"
                );

                tokio::select! {
                    _ = pause(self.config.batch_delay) => {}
                    _ = stop.stopped() => {}
                }
            }
        }

        Ok(stopped)
    }

    /// Write every record into `data_dir` and return the file's path.
    async fn export(&self, name: &str, records: &[ProductRecord]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| MarketCrawlError::io(&self.data_dir, e))?;

        let path = self.data_dir.join(filename_ru(name, records.len()));
        let rows: Vec<Row> = records.iter().map(ProductRecord::to_row).collect();

        let exporter = Arc::clone(&self.exporter);
        let target = path.clone();
        tokio::task::spawn_blocking(move || exporter.write(&rows, &target))
            .await
            .map_err(MarketCrawlError::export)??;

        Ok(path)
    }
}
