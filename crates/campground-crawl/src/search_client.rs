use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::crawl_types::{CrawlError, RawListing};
use crate::grid::Cell;

/// One page of search results for a cell
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Listings decoded from the page
    pub listings: Vec<RawListing>,
    /// Page number to request next, `None` once the API has nothing more
    pub next_page: Option<u32>,
}

/// Remote search API, queried one page of one cell at a time
#[async_trait::async_trait]
pub trait SearchTransport: Send + Sync {
    /// Fetches page `page` (1-based) of the listings inside `cell`
    async fn query(&self, cell: &Cell, page: u32) -> Result<SearchPage, CrawlError>;
}

/// Everything gathered for one cell
#[derive(Debug)]
pub struct CellResult {
    /// The queried cell
    pub cell: Cell,
    /// Listings from every page fetched, in page order
    pub listings: Vec<RawListing>,
    /// Pages successfully fetched
    pub pages: u32,
    /// Why the cell stopped early, if it did
    pub error: Option<CrawlError>,
}

/// Paginating, retrying client over a [`SearchTransport`]
#[derive(Clone)]
pub struct SearchClient {
    transport: Arc<dyn SearchTransport>,
    retry: RetryPolicy,
    max_pages_per_cell: Option<u32>,
}

impl SearchClient {
    /// Creates a client over `transport`
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        retry: RetryPolicy,
        max_pages_per_cell: Option<u32>,
    ) -> Self {
        Self {
            transport,
            retry,
            max_pages_per_cell,
        }
    }

    /// Fetches every page of `cell`.
    ///
    /// Never returns an error directly: a failure stops pagination and is
    /// reported in [`CellResult::error`] next to the pages already fetched.
    pub async fn fetch_cell(&self, cell: &Cell, cancel: &CancellationToken) -> CellResult {
        let mut listings = Vec::new();
        let mut pages = 0;
        let mut page = 1;

        loop {
            let result = match self.fetch_page(cell, page, cancel).await {
                Ok(result) => result,
                Err(e) => {
                    return CellResult {
                        cell: cell.clone(),
                        listings,
                        pages,
                        error: Some(e),
                    };
                }
            };

            pages += 1;
            listings.extend(result.listings);

            // Only the transport knows when the cell is exhausted
            let under_cap = self.max_pages_per_cell.is_none_or(|cap| pages < cap);
            match result.next_page {
                Some(next) if next > page && under_cap => page = next,
                _ => break,
            }
        }

        debug!(
            "Cell {} N:{:.2} S:{:.2} E:{:.2} W:{:.2} - {} listings over {} pages",
            cell.index,
            cell.north,
            cell.south,
            cell.east,
            cell.west,
            listings.len(),
            pages
        );

        CellResult {
            cell: cell.clone(),
            listings,
            pages,
            error: None,
        }
    }

    /// Fetches one page, retrying transient failures with backoff
    async fn fetch_page(
        &self,
        cell: &Cell,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<SearchPage, CrawlError> {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            attempt += 1;

            let error = match self.transport.query(cell, page).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= self.retry.max_attempts {
                return Err(CrawlError::Transient(format!(
                    "{} (gave up after {} attempts)",
                    error, attempt
                )));
            }

            let delay = self.retry.delay_for(attempt, &error);
            warn!(
                "Cell {} page {} attempt {}/{} failed: {}; retrying in {:?}",
                cell.index, page, attempt, self.retry.max_attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}
