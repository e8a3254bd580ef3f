use std::sync::Arc;
use std::time::Duration;

use campground_crawl::{
    BoundingBox, Cell, CrawlConfig, CrawlEngine, CrawlError, MemoryCampgroundStore, RawListing,
    SearchPage, SearchRegion, SearchTransport,
};

/// Answers every cell with one listing named after the cell
pub struct OnePerCell;

#[async_trait::async_trait]
impl SearchTransport for OnePerCell {
    async fn query(&self, cell: &Cell, _page: u32) -> Result<SearchPage, CrawlError> {
        Ok(SearchPage {
            listings: vec![RawListing::new(
                format!("cell-{}", cell.index),
                "Camp",
                cell.south,
                cell.west,
                "Utah",
            )],
            next_page: None,
        })
    }
}

/// Takes a while to answer, so a run stays active during a test
pub struct SlowTransport;

#[async_trait::async_trait]
impl SearchTransport for SlowTransport {
    async fn query(&self, cell: &Cell, page: u32) -> Result<SearchPage, CrawlError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        OnePerCell.query(cell, page).await
    }
}

/// Engine over a 2x2 grid in Utah backed by a fresh in-memory store
pub fn engine_with(transport: Arc<dyn SearchTransport>) -> CrawlEngine {
    let config = CrawlConfig {
        regions: vec![SearchRegion::new(
            "utah",
            BoundingBox {
                north: 40.0,
                south: 38.0,
                east: -110.0,
                west: -112.0,
            },
        )],
        ..CrawlConfig::default()
    };

    CrawlEngine::new(config, transport, Arc::new(MemoryCampgroundStore::new()))
        .expect("test config is valid")
}
