//! # Campground Crawl
//!
//! This crate crawls campground listings from TheDyrt across a geographic grid
//! and reconciles them with the stored campground table.
//! A run partitions the configured regions into cells, queries the cells
//! concurrently under a fixed limit, merges duplicates found in several cells,
//! upserts the result and records per-run statistics.

/// Shared types: listings, records, run statistics and errors
mod crawl_types;
pub use crawl_types::*;

/// Crawl configuration loaded from the environment
mod config;
pub use config::*;

/// Geo-grid partitioning of bounding boxes into cells
mod grid;
pub use grid::*;

/// Paginating, retrying search client and its transport seam
mod search_client;
pub use search_client::*;

/// HTTP transport for TheDyrt location search
mod dyrt_client;
pub use dyrt_client::*;

/// Bound on simultaneously queried cells
mod governor;
pub use governor::*;

/// Identifier-based deduplication of listings
mod merger;
pub use merger::*;

/// Store interface and the in-memory implementation
mod store;
pub use store::*;

/// PostgreSQL store
mod pg_store;
pub use pg_store::*;

/// Run statistics aggregation
mod recorder;
pub use recorder::*;

/// Live run counters
mod progress;
pub use progress::*;

/// Crawl orchestration and run handles
mod executor;
pub use executor::*;
