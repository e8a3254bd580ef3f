use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::crawl_types::{CellFailure, CrawlError, RawListing, RunStats, RunStatus, UpsertOutcome};
use crate::search_client::CellResult;

/// Accumulates the statistics of one run and finalizes them exactly once.
///
/// Owned by the orchestrator; nothing else writes to it.
pub struct RunRecorder {
    stats: RunStats,
    started: Instant,
    fatal: Option<String>,
    persistence_error: Option<String>,
}

impl RunRecorder {
    /// Creates a pending recorder for `run_id`
    pub fn new(run_id: Uuid) -> Self {
        Self {
            stats: RunStats::new(run_id),
            started: Instant::now(),
            fatal: None,
            persistence_error: None,
        }
    }

    /// Moves the run to `Running` with the number of cells it will query
    pub fn start(&mut self, cells_total: usize) {
        self.started = Instant::now();
        self.stats.run_date = Utc::now();
        self.stats.status = RunStatus::Running;
        self.stats.cells_total = cells_total as i32;
    }

    /// Remembers the row id the store assigned to this run
    pub fn set_id(&mut self, id: i64) {
        self.stats.id = Some(id);
    }

    /// The statistics gathered so far, not finalized
    pub fn snapshot(&self) -> RunStats {
        self.stats.clone()
    }

    /// Accounts one finished cell; cells stopped by cancellation are not failures
    pub fn record_cell(&mut self, result: &CellResult) {
        match &result.error {
            None | Some(CrawlError::Cancelled) => {}
            Some(e) => {
                self.stats.cells_failed += 1;
                self.stats.failed_cells.push(CellFailure {
                    cell: result.cell.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Accounts a cell whose worker died without reporting a result
    pub fn record_lost_cell(&mut self, reason: &str) {
        error!("Cell worker for run {} was lost: {}", self.stats.run_id, reason);
        self.stats.cells_failed += 1;
    }

    /// Sets totals, distinct regions and observed bounds from the merged set
    pub fn observe_merged(&mut self, listings: &[RawListing]) {
        let regions: HashSet<&str> = listings.iter().map(|l| l.region_name.as_str()).collect();

        self.stats.total_campgrounds = listings.len() as i32;
        self.stats.regions_count = regions.len() as i32;

        let latitudes = span(listings.iter().map(|l| l.latitude));
        let longitudes = span(listings.iter().map(|l| l.longitude));

        self.stats.min_latitude = latitudes.map(|(lo, _)| lo);
        self.stats.max_latitude = latitudes.map(|(_, hi)| hi);
        self.stats.min_longitude = longitudes.map(|(lo, _)| lo);
        self.stats.max_longitude = longitudes.map(|(_, hi)| hi);
    }

    /// Accounts one stored listing
    pub fn record_upsert(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::New => self.stats.new_campgrounds += 1,
            UpsertOutcome::Updated { changed } => {
                self.stats.updated_campgrounds += 1;
                if changed {
                    self.stats.changed_campgrounds += 1;
                }
            }
        }
    }

    /// Counts a listing that could not be persisted after retries
    pub fn record_persistence_failure(&mut self, id: &str, error: &CrawlError) {
        warn!("Failed to persist campground {}: {}", id, error);
        self.stats.failed_records += 1;
        if self.persistence_error.is_none() {
            self.persistence_error = Some(format!("Failed to persist campground {}: {}", id, error));
        }
    }

    /// Marks the run failed; only the first fatal error is kept
    pub fn fail(&mut self, error: &CrawlError) {
        if self.fatal.is_none() {
            error!("Crawl run {} failed: {}", self.stats.run_id, error);
            self.fatal = Some(error.to_string());
        }
    }

    /// Produces the final statistics.
    ///
    /// A fatal error wins over cancellation. The error message carries the
    /// fatal error, else the first persistence failure, else a note on how
    /// many cells could not be crawled.
    pub fn finish(mut self, cancelled: bool) -> RunStats {
        let stats = &mut self.stats;

        stats.status = if self.fatal.is_some() {
            RunStatus::Failed
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        stats.error_message = self
            .fatal
            .take()
            .or_else(|| self.persistence_error.take())
            .or_else(|| {
                stats.failed_cells.first().map(|first| {
                    format!(
                        "{} of {} cells failed; first: {}",
                        stats.cells_failed, stats.cells_total, first.error
                    )
                })
            });

        stats.duration_seconds = Some(self.started.elapsed().as_secs_f64());
        stats.finished_at = Some(Utc::now());

        self.stats
    }
}

/// Smallest and largest value, if any
fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONTINENTAL_US;
    use crate::grid::GridPartition;

    fn cell_result(error: Option<CrawlError>) -> CellResult {
        CellResult {
            cell: GridPartition::new("continental", CONTINENTAL_US, 10.0, 0)
                .next()
                .unwrap(),
            listings: Vec::new(),
            pages: 0,
            error,
        }
    }

    #[test]
    fn test_observed_bounds_and_regions() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.start(4);
        recorder.observe_merged(&[
            RawListing::new("a", "A", 30.0, -100.0, "Texas"),
            RawListing::new("b", "B", 45.0, -120.0, "Oregon"),
            RawListing::new("c", "C", 32.5, -97.0, "Texas"),
        ]);

        let stats = recorder.finish(false);
        assert_eq!(stats.status, RunStatus::Completed);
        assert_eq!(stats.total_campgrounds, 3);
        assert_eq!(stats.regions_count, 2);
        assert_eq!(stats.min_latitude, Some(30.0));
        assert_eq!(stats.max_latitude, Some(45.0));
        assert_eq!(stats.min_longitude, Some(-120.0));
        assert_eq!(stats.max_longitude, Some(-97.0));
        assert!(stats.duration_seconds.is_some());
        assert!(stats.error_message.is_none());
    }

    #[test]
    fn test_empty_run_has_no_bounds() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.observe_merged(&[]);
        let stats = recorder.finish(false);
        assert_eq!(stats.total_campgrounds, 0);
        assert!(stats.min_latitude.is_none());
    }

    #[test]
    fn test_upsert_counts() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.record_upsert(UpsertOutcome::New);
        recorder.record_upsert(UpsertOutcome::Updated { changed: false });
        recorder.record_upsert(UpsertOutcome::Updated { changed: true });

        let stats = recorder.finish(false);
        assert_eq!(stats.new_campgrounds, 1);
        assert_eq!(stats.updated_campgrounds, 2);
        assert_eq!(stats.changed_campgrounds, 1);
    }

    #[test]
    fn test_cell_failures_are_annotated_not_fatal() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.start(18);
        recorder.record_cell(&cell_result(None));
        recorder.record_cell(&cell_result(Some(CrawlError::Transient("HTTP 503".into()))));
        recorder.record_cell(&cell_result(Some(CrawlError::Cancelled)));

        let stats = recorder.finish(false);
        assert_eq!(stats.status, RunStatus::Completed);
        assert_eq!(stats.cells_failed, 1);
        assert_eq!(stats.failed_cells.len(), 1);
        assert!(stats.error_message.unwrap().starts_with("1 of 18 cells failed"));
    }

    #[test]
    fn test_first_fatal_error_wins() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.record_persistence_failure("x", &CrawlError::Persistence("deadlock".into()));
        recorder.fail(&CrawlError::AuthenticationFailed);
        recorder.fail(&CrawlError::Fatal("HTTP 404".into()));

        let stats = recorder.finish(true);
        assert_eq!(stats.status, RunStatus::Failed);
        assert_eq!(
            stats.error_message.as_deref(),
            Some("Authentication failed with external service")
        );
        assert_eq!(stats.failed_records, 1);
    }

    #[test]
    fn test_cancelled_run() {
        let mut recorder = RunRecorder::new(Uuid::new_v4());
        recorder.start(2);
        let stats = recorder.finish(true);
        assert_eq!(stats.status, RunStatus::Cancelled);
        assert!(stats.status.is_terminal());
    }
}
