use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::crawl_types::CrawlError;

/// Geographic rectangle in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_bounds"))]
pub struct BoundingBox {
    /// Northern edge (latitude)
    #[validate(range(min = -90.0, max = 90.0))]
    pub north: f64,
    /// Southern edge (latitude)
    #[validate(range(min = -90.0, max = 90.0))]
    pub south: f64,
    /// Eastern edge (longitude)
    #[validate(range(min = -180.0, max = 180.0))]
    pub east: f64,
    /// Western edge (longitude)
    #[validate(range(min = -180.0, max = 180.0))]
    pub west: f64,
}

/// Continental United States: Canadian border to the Florida Keys
pub const CONTINENTAL_US: BoundingBox = BoundingBox {
    north: 49.5,
    south: 24.5,
    east: -66.0,
    west: -125.0,
};

/// Alaska mainland and the eastern Aleutians
pub const ALASKA: BoundingBox = BoundingBox {
    north: 71.5,
    south: 51.0,
    east: -130.0,
    west: -170.0,
};

/// Hawaiian islands
pub const HAWAII: BoundingBox = BoundingBox {
    north: 22.5,
    south: 18.5,
    east: -154.5,
    west: -160.5,
};

fn validate_bounds(bounds: &BoundingBox) -> Result<(), ValidationError> {
    let edges = [bounds.north, bounds.south, bounds.east, bounds.west];
    if !edges.iter().all(|edge| edge.is_finite()) {
        return Err(ValidationError::new("non_finite_bounds"));
    }
    if bounds.south >= bounds.north {
        return Err(ValidationError::new("south_not_below_north"));
    }
    if bounds.west >= bounds.east {
        return Err(ValidationError::new("west_not_before_east"));
    }
    Ok(())
}

/// Named area covered by a crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SearchRegion {
    /// Region label used in logs and cell metadata
    #[validate(length(min = 1, message = "Region name is required"))]
    pub name: String,
    /// Area to partition
    #[validate(nested)]
    pub bounds: BoundingBox,
}

impl SearchRegion {
    /// Creates a region from a name and its bounds
    pub fn new(name: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            name: name.into(),
            bounds,
        }
    }

    /// Looks up one of the built-in US regions by name
    pub fn preset(name: &str) -> Option<Self> {
        let bounds = match name.trim().to_ascii_lowercase().as_str() {
            "continental" => CONTINENTAL_US,
            "alaska" => ALASKA,
            "hawaii" => HAWAII,
            _ => return None,
        };
        Some(Self::new(name.trim().to_ascii_lowercase(), bounds))
    }
}

/// Backoff schedule for retryable page requests
#[derive(Debug, Clone, Validate)]
pub struct RetryPolicy {
    /// Total attempts per page request, including the first one
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on every further retry
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay
    pub max_delay: Duration,

    /// Minimum wait after the API answered 429
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            rate_limit_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32, error: &CrawlError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        // Up to 25% jitter so concurrent cells do not retry in lockstep
        let jitter_ms = (delay.as_millis() / 4) as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        }

        if matches!(error, CrawlError::RateLimited) {
            delay = delay.max(self.rate_limit_delay);
        }

        delay
    }
}

/// Smallest accepted cell edge in degrees
pub const MIN_GRID_SIZE: f64 = 0.1;

/// Largest accepted cell edge
pub const MAX_GRID_SIZE: f64 = 90.0;

fn validate_grid_size(grid_size: f64) -> Result<(), ValidationError> {
    if grid_size.is_finite() && (MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&grid_size) {
        Ok(())
    } else {
        Err(ValidationError::new("grid_size_out_of_range"))
    }
}

/// Everything the crawl engine needs to know about one run
#[derive(Debug, Clone, Validate)]
pub struct CrawlConfig {
    /// Areas to partition, crawled in order
    #[validate(length(min = 1, message = "At least one region is required"), nested)]
    pub regions: Vec<SearchRegion>,

    /// Cell edge length in degrees
    #[validate(custom(function = "validate_grid_size"))]
    pub grid_size: f64,

    /// Maximum number of cells queried at the same time
    #[validate(range(min = 1, max = 64))]
    pub concurrency_limit: usize,

    /// Listings requested per page
    #[validate(range(min = 1, max = 100))]
    pub page_size: u32,

    /// Optional cap on pages fetched for one cell
    #[validate(range(min = 1))]
    pub max_pages_per_cell: Option<u32>,

    /// Backoff for page requests
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Attempts per record when the store reports a persistence error
    #[validate(range(min = 1, max = 10))]
    pub store_max_attempts: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            regions: vec![SearchRegion::new("continental", CONTINENTAL_US)],
            grid_size: 1.0,
            concurrency_limit: 3,
            page_size: 30,
            max_pages_per_cell: None,
            retry: RetryPolicy::default(),
            store_max_attempts: 3,
        }
    }
}

impl CrawlConfig {
    /// Loads the configuration from process environment variables
    pub fn from_env() -> Result<Self, CrawlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, falling back to defaults
    /// for unset keys, then validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrawlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut continental = CONTINENTAL_US;
        continental.north = parse_var(&lookup, "NORTH_BOUNDARY", continental.north)?;
        continental.south = parse_var(&lookup, "SOUTH_BOUNDARY", continental.south)?;
        continental.east = parse_var(&lookup, "EAST_BOUNDARY", continental.east)?;
        continental.west = parse_var(&lookup, "WEST_BOUNDARY", continental.west)?;

        let region_names = lookup("CRAWL_REGIONS").unwrap_or_else(|| "continental".to_string());
        let mut regions = Vec::new();
        for name in region_names.split(',').filter(|n| !n.trim().is_empty()) {
            let mut region = SearchRegion::preset(name).ok_or_else(|| {
                CrawlError::ConfigError(format!("Unknown region '{}'", name.trim()))
            })?;
            if region.name == "continental" {
                region.bounds = continental;
            }
            regions.push(region);
        }

        let max_pages_per_cell = match lookup("MAX_PAGES_PER_CELL") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|e| {
                CrawlError::ConfigError(format!("Invalid MAX_PAGES_PER_CELL '{}': {}", raw, e))
            })?),
            None => None,
        };

        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            ..RetryPolicy::default()
        };

        let config = Self {
            regions,
            grid_size: parse_var(&lookup, "GRID_SIZE", defaults.grid_size)?,
            concurrency_limit: parse_var(&lookup, "CONCURRENCY_LIMIT", defaults.concurrency_limit)?,
            page_size: parse_var(&lookup, "BATCH_SIZE", defaults.page_size)?,
            max_pages_per_cell,
            retry,
            store_max_attempts: parse_var(
                &lookup,
                "STORE_MAX_ATTEMPTS",
                defaults.store_max_attempts,
            )?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CrawlError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| CrawlError::ConfigError(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
