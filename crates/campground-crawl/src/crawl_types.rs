use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grid::Cell;

/// A campground as returned by one page of a cell query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    /// Stable external identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Region label (usually the state)
    pub region_name: String,
    /// Administrative area (park, forest, ...)
    pub administrative_area: Option<String>,
    /// Name of the nearest city
    pub nearest_city_name: Option<String>,
    /// Operating organisation
    pub operator: Option<String>,
    /// Cover photo
    pub photo_url: Option<String>,
    /// Average rating
    pub rating: Option<f64>,
    /// Number of reviews
    pub reviews_count: i32,
    /// Lowest nightly price
    pub price_low: Option<f64>,
    /// Highest nightly price
    pub price_high: Option<f64>,
    /// Street address
    pub address: Option<String>,
    /// URL slug on the provider site
    pub slug: Option<String>,
    /// Whether the campground can be booked online
    pub bookable: bool,
    /// Accommodation types offered (tent, rv, cabin, ...)
    pub accommodation_type_names: Vec<String>,
    /// Camper types allowed
    pub camper_types: Vec<String>,
    /// Number of photos on the provider site
    pub photos_count: i32,
    /// Gallery photos
    pub photo_urls: Vec<String>,
    /// Resource type reported next to the identifier
    pub location_type: Option<String>,
    /// When the provider last refreshed availability
    pub availability_updated_at: Option<DateTime<Utc>>,
}

impl RawListing {
    /// Creates a listing with only the required fields set
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        region_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude,
            longitude,
            region_name: region_name.into(),
            administrative_area: None,
            nearest_city_name: None,
            operator: None,
            photo_url: None,
            rating: None,
            reviews_count: 0,
            price_low: None,
            price_high: None,
            address: None,
            slug: None,
            bookable: false,
            accommodation_type_names: Vec::new(),
            camper_types: Vec::new(),
            photos_count: 0,
            photo_urls: Vec::new(),
            location_type: None,
            availability_updated_at: None,
        }
    }
}

/// Canonical persisted campground, keyed by the provider identifier
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CampgroundRecord {
    /// Provider identifier, immutable primary key
    pub id: String,
    /// Display name
    pub name: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Region label (usually the state)
    pub region_name: String,
    /// Administrative area (park, forest, ...)
    pub administrative_area: Option<String>,
    /// Name of the nearest city
    pub nearest_city_name: Option<String>,
    /// Operating organisation
    pub operator: Option<String>,
    /// Cover photo
    pub photo_url: Option<String>,
    /// Average rating
    pub rating: Option<f64>,
    /// Number of reviews
    pub reviews_count: i32,
    /// Lowest nightly price
    pub price_low: Option<f64>,
    /// Highest nightly price
    pub price_high: Option<f64>,
    /// Street address
    pub address: Option<String>,
    /// URL slug on the provider site
    pub slug: Option<String>,
    /// Whether the campground can be booked online
    pub bookable: bool,
    /// Accommodation types offered
    pub accommodation_type_names: Vec<String>,
    /// Camper types allowed
    pub camper_types: Vec<String>,
    /// Number of photos on the provider site
    pub photos_count: i32,
    /// Gallery photos
    pub photo_urls: Vec<String>,
    /// Resource type reported by the provider
    pub location_type: Option<String>,
    /// When the provider last refreshed availability
    pub availability_updated_at: Option<DateTime<Utc>>,
    /// Set on first insert, never modified afterwards
    pub created_at: DateTime<Utc>,
    /// Refreshed on every write
    pub updated_at: DateTime<Utc>,
}

impl CampgroundRecord {
    /// Builds a fresh record from a listing observed at `now`
    pub fn from_listing(listing: &RawListing, now: DateTime<Utc>) -> Self {
        let listing = listing.clone();
        Self {
            id: listing.id,
            name: listing.name,
            latitude: listing.latitude,
            longitude: listing.longitude,
            region_name: listing.region_name,
            administrative_area: listing.administrative_area,
            nearest_city_name: listing.nearest_city_name,
            operator: listing.operator,
            photo_url: listing.photo_url,
            rating: listing.rating,
            reviews_count: listing.reviews_count,
            price_low: listing.price_low,
            price_high: listing.price_high,
            address: listing.address,
            slug: listing.slug,
            bookable: listing.bookable,
            accommodation_type_names: listing.accommodation_type_names,
            camper_types: listing.camper_types,
            photos_count: listing.photos_count,
            photo_urls: listing.photo_urls,
            location_type: listing.location_type,
            availability_updated_at: listing.availability_updated_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// The listing view of this record, without the tracking timestamps
    pub fn to_listing(&self) -> RawListing {
        RawListing {
            id: self.id.clone(),
            name: self.name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            region_name: self.region_name.clone(),
            administrative_area: self.administrative_area.clone(),
            nearest_city_name: self.nearest_city_name.clone(),
            operator: self.operator.clone(),
            photo_url: self.photo_url.clone(),
            rating: self.rating,
            reviews_count: self.reviews_count,
            price_low: self.price_low,
            price_high: self.price_high,
            address: self.address.clone(),
            slug: self.slug.clone(),
            bookable: self.bookable,
            accommodation_type_names: self.accommodation_type_names.clone(),
            camper_types: self.camper_types.clone(),
            photos_count: self.photos_count,
            photo_urls: self.photo_urls.clone(),
            location_type: self.location_type.clone(),
            availability_updated_at: self.availability_updated_at,
        }
    }

    /// Overwrites every field from `listing` and refreshes `updated_at`.
    ///
    /// Returns whether any field actually differed. `id` and `created_at`
    /// are left untouched.
    pub fn apply(&mut self, listing: &RawListing, now: DateTime<Utc>) -> bool {
        let changed = self.to_listing() != *listing;
        let created_at = self.created_at;
        *self = Self::from_listing(listing, now);
        self.created_at = created_at;
        changed
    }
}

/// How the store classified one upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the identifier
    New,
    /// A record existed and was overwritten
    Updated {
        /// Whether any field value differed from the stored one
        changed: bool,
    },
}

/// Lifecycle of one crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,
    /// Cells are being crawled or results stored
    Running,
    /// Finished without a fatal error
    Completed,
    /// Stopped by a fatal error
    Failed,
    /// Stopped by a cancellation request
    Cancelled,
}

impl RunStatus {
    /// Column value used by the stores
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the run has been finalized
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// A cell whose query could not be completed
#[derive(Debug, Clone, Serialize)]
pub struct CellFailure {
    /// The cell that failed
    pub cell: Cell,
    /// Rendered error that ended the cell
    pub error: String,
}

/// Summary of one crawl invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// Row id assigned by the store, once recorded
    pub id: Option<i64>,
    /// Identifier shared with the run handle and progress
    pub run_id: Uuid,
    /// When the run started
    pub run_date: DateTime<Utc>,
    /// Current lifecycle state
    pub status: RunStatus,
    /// Distinct campgrounds merged in this run
    pub total_campgrounds: i32,
    /// Campgrounds stored for the first time
    pub new_campgrounds: i32,
    /// Existing campgrounds re-observed in this run, changed or not
    pub updated_campgrounds: i32,
    /// Subset of `updated_campgrounds` whose fields actually differed
    pub changed_campgrounds: i32,
    /// Distinct region names among merged campgrounds
    pub regions_count: i32,
    /// Southernmost merged campground
    pub min_latitude: Option<f64>,
    /// Northernmost merged campground
    pub max_latitude: Option<f64>,
    /// Westernmost merged campground
    pub min_longitude: Option<f64>,
    /// Easternmost merged campground
    pub max_longitude: Option<f64>,
    /// Cells the run set out to query
    pub cells_total: i32,
    /// Cells that ended with a non-cancellation error
    pub cells_failed: i32,
    /// Listings that could not be persisted after retries
    pub failed_records: i32,
    /// Wall-clock duration, pending until the run is finalized
    pub duration_seconds: Option<f64>,
    /// Fatal error, else first persistence failure, else a failed-cells note
    pub error_message: Option<String>,
    /// When the run was finalized
    pub finished_at: Option<DateTime<Utc>>,
    /// Not persisted; only `cells_failed` reaches the store
    pub failed_cells: Vec<CellFailure>,
}

impl RunStats {
    /// A pending run with nothing accounted yet
    pub fn new(run_id: Uuid) -> Self {
        Self {
            id: None,
            run_id,
            run_date: Utc::now(),
            status: RunStatus::Pending,
            total_campgrounds: 0,
            new_campgrounds: 0,
            updated_campgrounds: 0,
            changed_campgrounds: 0,
            regions_count: 0,
            min_latitude: None,
            max_latitude: None,
            min_longitude: None,
            max_longitude: None,
            cells_total: 0,
            cells_failed: 0,
            failed_records: 0,
            duration_seconds: None,
            error_message: None,
            finished_at: None,
            failed_cells: Vec::new(),
        }
    }

    /// A run that failed before any work could start
    pub fn failed(run_id: Uuid, message: impl Into<String>) -> Self {
        let mut stats = Self::new(run_id);
        stats.status = RunStatus::Failed;
        stats.duration_seconds = Some(0.0);
        stats.error_message = Some(message.into());
        stats.finished_at = Some(Utc::now());
        stats
    }
}

/// Custom error type for crawl operations
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    /// Network failure, timeout or 5xx from the search API
    #[error("Transient error: {0}")]
    Transient(String),

    /// Rate limited by external API
    #[error("Rate limited by external API")]
    RateLimited,

    /// Permanent rejection from the search API
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Authentication failed with external service
    #[error("Authentication failed with external service")]
    AuthenticationFailed,

    /// Store write or read failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Data format error
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another run is still active
    #[error("A crawl run is already in progress")]
    RunInProgress,

    /// The run was cancelled before the operation could start
    #[error("Crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Errors worth another attempt with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Transient(_) | CrawlError::RateLimited)
    }

    /// Errors that terminate the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::Fatal(_)
                | CrawlError::AuthenticationFailed
                | CrawlError::ConfigError(_)
                | CrawlError::Validation(_)
        )
    }
}

impl From<sqlx::Error> for CrawlError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolClosed | sqlx::Error::Configuration(_) | sqlx::Error::WorkerCrashed => {
                CrawlError::Fatal(format!("Database unavailable: {}", e))
            }
            _ => CrawlError::Persistence(e.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for CrawlError {
    fn from(e: validator::ValidationErrors) -> Self {
        CrawlError::Validation(e.to_string())
    }
}

impl actix_web::ResponseError for CrawlError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            CrawlError::RunInProgress => StatusCode::CONFLICT,
            CrawlError::Validation(_) | CrawlError::ConfigError(_) => StatusCode::BAD_REQUEST,
            CrawlError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CrawlError::Transient(_) | CrawlError::Fatal(_) | CrawlError::AuthenticationFailed => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        let code = match self {
            CrawlError::RunInProgress => "run_in_progress",
            CrawlError::Validation(_) => "validation_error",
            CrawlError::ConfigError(_) => "configuration_error",
            CrawlError::RateLimited => "rate_limited",
            CrawlError::Transient(_) | CrawlError::Fatal(_) | CrawlError::AuthenticationFailed => {
                "api_error"
            }
            CrawlError::Persistence(_) => "database_error",
            _ => "internal_error",
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": code,
            "message": self.to_string()
        }))
    }
}
