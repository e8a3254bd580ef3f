use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::crawl_types::{CampgroundRecord, CrawlError, RawListing, RunStats, UpsertOutcome};

/// Durable state the crawl reconciles against
///
/// Implementations must serialize writes per identifier: two concurrent
/// upserts of the same campground may not both observe "absent".
#[async_trait::async_trait]
pub trait CampgroundStore: Send + Sync {
    /// Looks up a campground by its provider identifier
    async fn get(&self, id: &str) -> Result<Option<CampgroundRecord>, CrawlError>;

    /// Inserts or overwrites the campground for `listing.id`
    async fn upsert(&self, listing: &RawListing, now: DateTime<Utc>)
    -> Result<UpsertOutcome, CrawlError>;

    /// Inserts the run row when `stats.id` is unset, updates it otherwise.
    /// Returns the row id.
    async fn record_run(&self, stats: &RunStats) -> Result<i64, CrawlError>;
}

/// In-process store used by tests and dry runs
#[derive(Default)]
pub struct MemoryCampgroundStore {
    campgrounds: Mutex<HashMap<String, CampgroundRecord>>,
    runs: Mutex<Vec<RunStats>>,
}

impl MemoryCampgroundStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored campgrounds
    pub async fn len(&self) -> usize {
        self.campgrounds.lock().await.len()
    }

    /// Whether no campground is stored
    pub async fn is_empty(&self) -> bool {
        self.campgrounds.lock().await.is_empty()
    }

    /// Every recorded run, oldest first
    pub async fn runs(&self) -> Vec<RunStats> {
        self.runs.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl CampgroundStore for MemoryCampgroundStore {
    async fn get(&self, id: &str) -> Result<Option<CampgroundRecord>, CrawlError> {
        Ok(self.campgrounds.lock().await.get(id).cloned())
    }

    async fn upsert(
        &self,
        listing: &RawListing,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, CrawlError> {
        let mut campgrounds = self.campgrounds.lock().await;

        match campgrounds.get_mut(&listing.id) {
            Some(record) => {
                let changed = record.apply(listing, now);
                Ok(UpsertOutcome::Updated { changed })
            }
            None => {
                campgrounds.insert(
                    listing.id.clone(),
                    CampgroundRecord::from_listing(listing, now),
                );
                Ok(UpsertOutcome::New)
            }
        }
    }

    async fn record_run(&self, stats: &RunStats) -> Result<i64, CrawlError> {
        let mut runs = self.runs.lock().await;

        match stats.id {
            Some(id) => {
                let slot = usize::try_from(id - 1)
                    .ok()
                    .and_then(|index| runs.get_mut(index))
                    .ok_or_else(|| CrawlError::Persistence(format!("Run {} not found", id)))?;
                *slot = stats.clone();
                Ok(id)
            }
            None => {
                let id = runs.len() as i64 + 1;
                let mut stored = stats.clone();
                stored.id = Some(id);
                runs.push(stored);
                Ok(id)
            }
        }
    }
}
