use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{error, info};
use uuid::Uuid;

use campground_crawl::{CrawlEngine, CrawlError, ProgressSnapshot, RunHandle, RunStats};

/// Longest accepted gap between scheduled runs
pub const MAX_SCHEDULE_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);

/// Shortest accepted gap between scheduled runs
pub const MIN_SCHEDULE_PERIOD: Duration = Duration::from_secs(1);

/// Manager for the crawl execution system
/// Owns at most one active run and remembers the last finished one
pub struct CrawlManager {
    engine: CrawlEngine,
    runs: Mutex<RunSlots>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct RunSlots {
    current: Option<RunHandle>,
    last: Option<RunStats>,
}

impl RunSlots {
    /// Moves a finished run from `current` to `last`
    async fn reap(&mut self) {
        if !self.current.as_ref().is_some_and(RunHandle::is_finished) {
            return;
        }
        if let Some(handle) = self.current.take() {
            self.last = Some(handle.wait().await);
        }
    }
}

/// Crawler state reported by the status endpoint
#[derive(Debug, Serialize)]
pub struct CrawlerStatus {
    /// Whether a run is active
    pub running: bool,
    /// Counters of the active run
    pub current_run: Option<ProgressSnapshot>,
    /// Final statistics of the last finished run
    pub last_run: Option<RunStats>,
}

impl CrawlManager {
    /// Create a new crawl manager
    pub fn new(engine: CrawlEngine) -> Self {
        Self {
            engine,
            runs: Mutex::new(RunSlots::default()),
            scheduler_handle: Mutex::new(None),
        }
    }

    /// Starts a run unless one is already active
    pub async fn trigger(&self) -> Result<Uuid, CrawlError> {
        let mut runs = self.runs.lock().await;
        runs.reap().await;

        if runs.current.is_some() {
            return Err(CrawlError::RunInProgress);
        }

        let handle = self.engine.start();
        let run_id = handle.id();
        runs.current = Some(handle);

        info!("Crawl run {} started", run_id);
        Ok(run_id)
    }

    /// Cancels the active run, if any
    pub async fn cancel(&self) -> Option<Uuid> {
        let mut runs = self.runs.lock().await;
        runs.reap().await;

        runs.current.as_ref().map(|handle| {
            handle.cancel();
            handle.id()
        })
    }

    /// Get the current state of the crawler
    pub async fn status(&self) -> CrawlerStatus {
        let mut runs = self.runs.lock().await;
        runs.reap().await;

        CrawlerStatus {
            running: runs.current.is_some(),
            current_run: runs.current.as_ref().map(RunHandle::progress),
            last_run: runs.last.clone(),
        }
    }

    /// Triggers a run every `period`, the first one after a full period.
    /// Ticks that find a run still active are skipped. `period` is clamped
    /// to [`MIN_SCHEDULE_PERIOD`]..=[`MAX_SCHEDULE_PERIOD`].
    pub async fn start_scheduler(self: &Arc<Self>, period: Duration) {
        let period = period.clamp(MIN_SCHEDULE_PERIOD, MAX_SCHEDULE_PERIOD);
        let manager: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                ticker.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };

                match manager.trigger().await {
                    Ok(run_id) => info!("Scheduled crawl run {} started", run_id),
                    Err(CrawlError::RunInProgress) => {
                        info!("Skipping scheduled crawl: previous run still active")
                    }
                    Err(e) => error!("Scheduled crawl failed to start: {}", e),
                }
            }
        });

        if let Some(previous) = self.scheduler_handle.lock().await.replace(handle) {
            previous.abort();
        }

        info!("Crawl scheduler started, running every {:?}", period);
    }

    /// Stops the scheduler and waits for the active run to wind down
    pub async fn stop(&self) {
        info!("Stopping crawl execution system");

        if let Some(handle) = self.scheduler_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let current = self.runs.lock().await.current.take();
        if let Some(handle) = current {
            handle.cancel();
            let stats = handle.wait().await;
            info!("Crawl run {} stopped as {}", stats.run_id, stats.status.as_str());
        }

        info!("Crawl execution system stopped");
    }
}

impl Drop for CrawlManager {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler_handle.get_mut().take() {
            handle.abort();
        }
    }
}
