use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::CrawlConfig;
use crate::crawl_types::{CrawlError, RawListing, RunStats, UpsertOutcome};
use crate::governor::ConcurrencyGovernor;
use crate::grid::{Cell, partition_regions};
use crate::merger::ResultMerger;
use crate::progress::{CrawlProgress, ProgressSnapshot};
use crate::recorder::RunRecorder;
use crate::search_client::{CellResult, SearchClient, SearchTransport};
use crate::store::CampgroundStore;

/// Main crawl execution engine
///
/// Cheap to clone; every run started from it shares the same transport and
/// store but owns its own progress, recorder and cancellation token.
#[derive(Clone)]
pub struct CrawlEngine {
    config: Arc<CrawlConfig>,
    client: SearchClient,
    store: Arc<dyn CampgroundStore>,
}

/// Handle to a run started with [`CrawlEngine::start`]
pub struct RunHandle {
    run_id: Uuid,
    progress: Arc<CrawlProgress>,
    cancel: CancellationToken,
    task: JoinHandle<RunStats>,
}

impl RunHandle {
    /// Identifier of the run
    pub fn id(&self) -> Uuid {
        self.run_id
    }

    /// Current counters of the run
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Stops the run: no new cell, page or retry is started, requests
    /// already sent are allowed to finish, and whatever was gathered is
    /// still merged and stored.
    pub fn cancel(&self) {
        info!("Cancelling crawl run {}", self.run_id);
        self.cancel.cancel();
    }

    /// Whether the run task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to end and returns its final statistics
    pub async fn wait(self) -> RunStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Crawl run {} task ended abnormally: {}", self.run_id, e);
                RunStats::failed(self.run_id, format!("Crawl task ended abnormally: {}", e))
            }
        }
    }
}

impl CrawlEngine {
    /// Builds an engine after validating `config`
    pub fn new(
        config: CrawlConfig,
        transport: Arc<dyn SearchTransport>,
        store: Arc<dyn CampgroundStore>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        let client = SearchClient::new(
            transport,
            config.retry.clone(),
            config.max_pages_per_cell,
        );

        Ok(Self {
            config: Arc::new(config),
            client,
            store,
        })
    }

    /// Spawns a run in the background and returns its handle
    pub fn start(&self) -> RunHandle {
        let run_id = Uuid::new_v4();
        let progress = Arc::new(CrawlProgress::new(run_id));
        let cancel = CancellationToken::new();

        let engine = self.clone();
        let task_progress = progress.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            engine.execute(run_id, &task_progress, &task_cancel).await
        });

        RunHandle {
            run_id,
            progress,
            cancel,
            task,
        }
    }

    /// Runs one crawl to completion on the current task
    pub async fn run(&self) -> RunStats {
        let run_id = Uuid::new_v4();
        let progress = CrawlProgress::new(run_id);
        self.execute(run_id, &progress, &CancellationToken::new())
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        progress: &CrawlProgress,
        cancel: &CancellationToken,
    ) -> RunStats {
        let mut recorder = RunRecorder::new(run_id);
        let cells = partition_regions(&self.config.regions, self.config.grid_size);
        let cells_total = cells.len();

        recorder.start(cells_total);
        progress.start(cells_total);

        info!(
            "Starting crawl run {}: {} cells across {} regions (grid {}°, concurrency {})",
            run_id,
            cells_total,
            self.config.regions.len(),
            self.config.grid_size,
            self.config.concurrency_limit
        );

        match self.store.record_run(&recorder.snapshot()).await {
            Ok(id) => recorder.set_id(id),
            Err(e) => {
                error!("Could not record start of run {}: {}", run_id, e);
                recorder.fail(&e);
                let stats = recorder.finish(false);
                progress.set_status(stats.status);
                return stats;
            }
        }

        let results = self
            .crawl_cells(cells, &mut recorder, progress, cancel)
            .await;

        let mut merger = ResultMerger::new();
        for result in results {
            merger.extend(result.listings);
        }
        let observed = merger.observed();
        let merged = merger.finish();
        info!(
            "Merged {} listings into {} distinct campgrounds",
            observed,
            merged.len()
        );

        recorder.observe_merged(&merged);
        self.upsert_all(&merged, &mut recorder).await;

        let stats = recorder.finish(cancel.is_cancelled());

        if let Err(e) = self.store.record_run(&stats).await {
            error!("Failed to record final statistics for run {}: {}", run_id, e);
        }
        progress.set_status(stats.status);

        info!(
            "Crawl run {} {}: {} campgrounds ({} new, {} updated, {} changed), {} of {} cells failed, {} records failed, {:.1}s",
            run_id,
            stats.status.as_str(),
            stats.total_campgrounds,
            stats.new_campgrounds,
            stats.updated_campgrounds,
            stats.changed_campgrounds,
            stats.cells_failed,
            stats.cells_total,
            stats.failed_records,
            stats.duration_seconds.unwrap_or_default()
        );

        stats
    }

    /// Queries every cell under the governor and returns the results in
    /// cell-index order
    async fn crawl_cells(
        &self,
        cells: impl Iterator<Item = Cell>,
        recorder: &mut RunRecorder,
        progress: &CrawlProgress,
        cancel: &CancellationToken,
    ) -> Vec<CellResult> {
        let governor = ConcurrencyGovernor::new(self.config.concurrency_limit);
        // Cancelled by the caller, or by us on a fatal error
        let halt = cancel.child_token();
        let mut workers = JoinSet::new();
        let mut results = Vec::new();

        for cell in cells {
            let Some(permit) = governor.acquire(&halt).await else {
                debug!("Crawl halted before cell {}", cell.index);
                break;
            };

            while let Some(joined) = workers.try_join_next() {
                self.collect(joined, &mut results, recorder, progress, &halt);
            }
            if halt.is_cancelled() {
                break;
            }

            debug!(
                "Admitting cell {} ({}/{} slots busy)",
                cell.index,
                governor.in_flight(),
                governor.limit()
            );
            let client = self.client.clone();
            let worker_halt = halt.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = client.fetch_cell(&cell, &worker_halt).await;
                if result.error.as_ref().is_some_and(CrawlError::is_fatal) {
                    // Before the permit drops, so no further cell is admitted
                    worker_halt.cancel();
                }
                result
            });
        }

        while let Some(joined) = workers.join_next().await {
            self.collect(joined, &mut results, recorder, progress, &halt);
        }

        results.sort_by_key(|result| result.cell.index);
        results
    }

    fn collect(
        &self,
        joined: Result<CellResult, JoinError>,
        results: &mut Vec<CellResult>,
        recorder: &mut RunRecorder,
        progress: &CrawlProgress,
        halt: &CancellationToken,
    ) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                recorder.record_lost_cell(&e.to_string());
                progress.cell_done(true, 0);
                return;
            }
        };

        let failed = matches!(&result.error, Some(e) if !matches!(e, CrawlError::Cancelled));
        if let Some(e) = &result.error {
            if e.is_fatal() {
                recorder.fail(e);
                halt.cancel();
            } else if failed {
                warn!(
                    "Cell {} ({}) failed after {} pages: {}",
                    result.cell.index, result.cell.region, result.pages, e
                );
            }
        }

        recorder.record_cell(&result);
        progress.cell_done(failed, result.listings.len());
        results.push(result);
    }

    /// Writes every merged listing, retrying persistence errors per record.
    /// A fatal store error stops the phase.
    async fn upsert_all(&self, listings: &[RawListing], recorder: &mut RunRecorder) {
        for listing in listings {
            match self.upsert_with_retry(listing).await {
                Ok(outcome) => recorder.record_upsert(outcome),
                Err(e) if e.is_fatal() => {
                    recorder.fail(&e);
                    break;
                }
                Err(e) => recorder.record_persistence_failure(&listing.id, &e),
            }
        }
    }

    async fn upsert_with_retry(&self, listing: &RawListing) -> Result<UpsertOutcome, CrawlError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.store.upsert(listing, Utc::now()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_fatal() || attempt >= self.config.store_max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        "Upsert of {} failed (attempt {}/{}): {}",
                        listing.id, attempt, self.config.store_max_attempts, e
                    );
                    sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
            }
        }
    }
}

/// Runs one crawl and returns its statistics.
///
/// Always yields a [`RunStats`]; an invalid configuration produces a
/// `Failed` one carrying the validation message.
pub async fn run_crawl(
    config: CrawlConfig,
    transport: Arc<dyn SearchTransport>,
    store: Arc<dyn CampgroundStore>,
) -> RunStats {
    match CrawlEngine::new(config, transport, store) {
        Ok(engine) => engine.run().await,
        Err(e) => {
            error!("Refusing to start crawl: {}", e);
            RunStats::failed(Uuid::new_v4(), e.to_string())
        }
    }
}
