use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;
use uuid::Uuid;

use crate::crawl_types::RunStatus;

/// Live counters of one run, written by the orchestrator and readable
/// from any task while the run is in flight
#[derive(Debug)]
pub struct CrawlProgress {
    run_id: Uuid,
    status: AtomicU8,
    cells_total: AtomicUsize,
    cells_completed: AtomicUsize,
    cells_failed: AtomicUsize,
    listings_seen: AtomicUsize,
}

/// Point-in-time copy of [`CrawlProgress`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Run the counters belong to
    pub run_id: Uuid,
    /// Lifecycle state at snapshot time
    pub status: RunStatus,
    /// Cells the run set out to query
    pub cells_total: usize,
    /// Cells finished, failed ones included
    pub cells_completed: usize,
    /// Cells that ended with an error
    pub cells_failed: usize,
    /// Listings returned so far, duplicates included
    pub listings_seen: usize,
}

impl CrawlProgress {
    /// Fresh counters for a pending run
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: AtomicU8::new(encode(RunStatus::Pending)),
            cells_total: AtomicUsize::new(0),
            cells_completed: AtomicUsize::new(0),
            cells_failed: AtomicUsize::new(0),
            listings_seen: AtomicUsize::new(0),
        }
    }

    pub(crate) fn start(&self, cells_total: usize) {
        self.cells_total.store(cells_total, Ordering::Relaxed);
        self.set_status(RunStatus::Running);
    }

    /// Counts one finished cell and the listings it returned
    pub(crate) fn cell_done(&self, failed: bool, listings: usize) {
        self.listings_seen.fetch_add(listings, Ordering::Relaxed);
        if failed {
            self.cells_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.cells_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.status.store(encode(status), Ordering::Release);
    }

    /// Current lifecycle state
    pub fn status(&self) -> RunStatus {
        decode(self.status.load(Ordering::Acquire))
    }

    /// Copies the current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run_id: self.run_id,
            status: self.status(),
            cells_total: self.cells_total.load(Ordering::Relaxed),
            cells_completed: self.cells_completed.load(Ordering::Relaxed),
            cells_failed: self.cells_failed.load(Ordering::Relaxed),
            listings_seen: self.listings_seen.load(Ordering::Relaxed),
        }
    }
}

fn encode(status: RunStatus) -> u8 {
    match status {
        RunStatus::Pending => 0,
        RunStatus::Running => 1,
        RunStatus::Completed => 2,
        RunStatus::Failed => 3,
        RunStatus::Cancelled => 4,
    }
}

fn decode(value: u8) -> RunStatus {
    match value {
        0 => RunStatus::Pending,
        1 => RunStatus::Running,
        2 => RunStatus::Completed,
        3 => RunStatus::Failed,
        _ => RunStatus::Cancelled,
    }
}
