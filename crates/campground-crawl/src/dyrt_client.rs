use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::crawl_types::{CrawlError, RawListing};
use crate::grid::Cell;
use crate::search_client::{SearchPage, SearchTransport};

/// Default API root for TheDyrt
pub const DYRT_BASE_URL: &str = "https://thedyrt.com/api/v6";

/// Client for TheDyrt location search API
pub struct DyrtClient {
    client: Client,
    search_url: String,
    page_size: u32,
}

/// Response structure from the location search endpoint
#[derive(Debug, Deserialize)]
pub struct DyrtSearchResponse {
    /// Kept as raw values so one malformed location does not sink the page
    pub data: Vec<Value>,
}

/// Individual location from the search response
#[derive(Debug, Deserialize)]
pub struct DyrtLocation {
    /// String or numeric identifier
    pub id: Option<Value>,

    /// JSON:API resource type
    #[serde(rename = "type")]
    pub kind: Option<String>,

    /// Location attributes, absent on broken entries
    pub attributes: Option<DyrtAttributes>,
}

/// Location attributes, kebab-case on the wire
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DyrtAttributes {
    /// `name`
    pub name: Option<String>,
    /// `latitude`
    pub latitude: Option<f64>,
    /// `longitude`
    pub longitude: Option<f64>,
    /// `region-name`
    pub region_name: Option<String>,
    /// `administrative-area`
    pub administrative_area: Option<String>,
    /// `nearest-city-name`
    pub nearest_city_name: Option<String>,
    /// `operator`
    pub operator: Option<String>,
    /// `photo-url`
    pub photo_url: Option<String>,
    /// `rating`
    pub rating: Option<f64>,
    /// `reviews-count`
    pub reviews_count: Option<i32>,
    /// `price-low`
    pub price_low: Option<f64>,
    /// `price-high`
    pub price_high: Option<f64>,
    /// `address`
    pub address: Option<String>,
    /// `slug`
    pub slug: Option<String>,
    /// `bookable`
    pub bookable: Option<bool>,
    /// `accommodation-type-names`, expected to be a list
    pub accommodation_type_names: Option<Value>,
    /// `camper-types`, expected to be a list
    pub camper_types: Option<Value>,
    /// `photos-count`
    pub photos_count: Option<i32>,
    /// `photo-urls`, expected to be a list
    pub photo_urls: Option<Value>,
    /// `availability-updated-at`, RFC 3339
    pub availability_updated_at: Option<String>,
}

impl DyrtClient {
    /// Create a new TheDyrt API client
    pub fn new(base_url: Option<String>, page_size: u32) -> Result<Self, CrawlError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::REFERER,
            reqwest::header::HeaderValue::from_static("https://thedyrt.com/search"),
        );

        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36")
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.unwrap_or_else(|| DYRT_BASE_URL.to_string());

        Ok(Self {
            client,
            search_url: format!("{}/locations/search-results", base_url.trim_end_matches('/')),
            page_size,
        })
    }

    /// Fetch one page of campgrounds inside the cell's bounds
    pub async fn fetch_campgrounds_by_bounds(
        &self,
        cell: &Cell,
        page: u32,
    ) -> Result<SearchPage, CrawlError> {
        debug!(
            "Fetching page {} for cell N:{:.2} S:{:.2} E:{:.2} W:{:.2}",
            page, cell.north, cell.south, cell.east, cell.west
        );

        let params = [
            ("ne", format!("{},{}", cell.north, cell.east)),
            ("sw", format!("{},{}", cell.south, cell.west)),
            ("page[size]", self.page_size.to_string()),
            ("page[number]", page.to_string()),
        ];

        let response = self
            .client
            .get(&self.search_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| CrawlError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            warn!("Search request failed with status {}: {}", status, body);
            return Err(classify_status(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Transient(format!("Failed to read response: {}", e)))?;

        let search_response: DyrtSearchResponse = serde_json::from_str(&body)
            .map_err(|e| CrawlError::DataFormat(format!("Failed to parse response: {}", e)))?;

        let received = search_response.data.len();
        let listings: Vec<RawListing> = search_response
            .data
            .into_iter()
            .filter_map(parse_location)
            .collect();

        // A short page is the API's way of saying there is nothing more
        let next_page = (received as u32 >= self.page_size && received > 0).then_some(page + 1);

        Ok(SearchPage {
            listings,
            next_page,
        })
    }
}

#[async_trait::async_trait]
impl SearchTransport for DyrtClient {
    async fn query(&self, cell: &Cell, page: u32) -> Result<SearchPage, CrawlError> {
        self.fetch_campgrounds_by_bounds(cell, page).await
    }
}

/// Map a non-success status to the crawl error taxonomy
fn classify_status(status: StatusCode, body: &str) -> CrawlError {
    match status.as_u16() {
        429 => CrawlError::RateLimited,
        401 | 403 => CrawlError::AuthenticationFailed,
        408 => CrawlError::Transient(format!("HTTP {}", status)),
        s if s >= 500 => CrawlError::Transient(format!("HTTP {}", status)),
        _ => CrawlError::Fatal(format!("HTTP {} - {}", status, body)),
    }
}

/// Convert one raw location into a listing, dropping incomplete ones
fn parse_location(value: Value) -> Option<RawListing> {
    let location: DyrtLocation = match serde_json::from_value(value) {
        Ok(location) => location,
        Err(e) => {
            warn!("Skipping malformed location: {}", e);
            return None;
        }
    };

    let id = match location.id {
        Some(Value::String(id)) if !id.is_empty() => id,
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            warn!("Skipping location without id");
            return None;
        }
    };

    let Some(attributes) = location.attributes else {
        warn!("Campground {} has no attributes", id);
        return None;
    };

    let name = match attributes.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => {
            warn!("Campground missing required 'name' field: {}", id);
            return None;
        }
    };

    let (Some(latitude), Some(longitude)) = (attributes.latitude, attributes.longitude) else {
        warn!("Campground missing coordinates: {}", id);
        return None;
    };

    let region_name = match attributes.region_name {
        Some(region) if !region.trim().is_empty() => region,
        _ => {
            warn!("Campground missing region-name: {}", id);
            return None;
        }
    };

    Some(RawListing {
        id,
        name,
        latitude,
        longitude,
        region_name,
        administrative_area: attributes.administrative_area,
        nearest_city_name: attributes.nearest_city_name,
        operator: attributes.operator,
        photo_url: attributes.photo_url,
        rating: attributes.rating,
        reviews_count: attributes.reviews_count.unwrap_or(0),
        price_low: attributes.price_low,
        price_high: attributes.price_high,
        address: attributes.address,
        slug: attributes.slug,
        bookable: attributes.bookable.unwrap_or(false),
        accommodation_type_names: string_list(attributes.accommodation_type_names),
        camper_types: string_list(attributes.camper_types),
        photos_count: attributes.photos_count.unwrap_or(0),
        photo_urls: string_list(attributes.photo_urls),
        location_type: location.kind.filter(|kind| !kind.is_empty()),
        availability_updated_at: attributes
            .availability_updated_at
            .as_deref()
            .and_then(parse_timestamp),
    })
}

/// RFC 3339 timestamp, or `None` when the provider sent something else
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(timestamp) => Some(timestamp.with_timezone(&Utc)),
        Err(e) => {
            debug!("Ignoring unparseable timestamp '{}': {}", raw, e);
            None
        }
    }
}

/// Lists that are not JSON arrays are treated as empty
fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            CrawlError::RateLimited
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            CrawlError::AuthenticationFailed
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(classify_status(StatusCode::NOT_FOUND, "").is_fatal());
        assert!(classify_status(StatusCode::BAD_REQUEST, "").is_fatal());
    }

    #[test]
    fn test_parse_location() {
        let listing = parse_location(json!({
            "id": "1234",
            "type": "location-search-results",
            "attributes": {
                "name": "Pine Flat",
                "latitude": 36.1,
                "longitude": -118.2,
                "region-name": "California",
                "nearest-city-name": "Kernville",
                "rating": 4.2,
                "reviews-count": 17,
                "price-low": 20.0,
                "camper-types": ["tent", "rv"],
                "accommodation-type-names": "not a list"
            }
        }))
        .unwrap();

        assert_eq!(listing.id, "1234");
        assert_eq!(listing.region_name, "California");
        assert_eq!(listing.nearest_city_name.as_deref(), Some("Kernville"));
        assert_eq!(listing.reviews_count, 17);
        assert_eq!(listing.camper_types, vec!["tent", "rv"]);
        assert!(listing.accommodation_type_names.is_empty());
        assert!(!listing.bookable);
    }

    #[test]
    fn test_parse_location_rejects_incomplete() {
        assert!(parse_location(json!({"id": "1", "attributes": {"latitude": 1.0, "longitude": 2.0, "region-name": "Utah"}})).is_none());
        assert!(parse_location(json!({"id": "1", "attributes": {"name": "Camp", "region-name": "Utah"}})).is_none());
        assert!(parse_location(json!({"id": "1", "attributes": {"name": "Camp", "latitude": 1.0, "longitude": 2.0}})).is_none());
        assert!(parse_location(json!({"attributes": {"name": "Camp", "latitude": 1.0, "longitude": 2.0, "region-name": "Utah"}})).is_none());
        assert!(parse_location(json!({"id": "1"})).is_none());
        assert!(parse_location(json!("garbage")).is_none());
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let listing = parse_location(json!({
            "id": 77,
            "attributes": {"name": "Camp", "latitude": 1.0, "longitude": 2.0, "region-name": "Utah"}
        }))
        .unwrap();
        assert_eq!(listing.id, "77");
        assert!(listing.location_type.is_none());
    }

    #[test]
    fn test_gallery_type_and_availability_are_carried() {
        let listing = parse_location(json!({
            "id": "9",
            "type": "location-search-results",
            "attributes": {
                "name": "Camp",
                "latitude": 1.0,
                "longitude": 2.0,
                "region-name": "Utah",
                "photo-urls": ["https://img.example/1.jpg", "https://img.example/2.jpg"],
                "availability-updated-at": "2024-05-01T12:30:00Z"
            }
        }))
        .unwrap();

        assert_eq!(listing.photo_urls.len(), 2);
        assert_eq!(listing.location_type.as_deref(), Some("location-search-results"));
        assert_eq!(
            listing.availability_updated_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T12:30:00+00:00".to_string())
        );
    }

    #[test]
    fn test_malformed_gallery_and_timestamp_are_tolerated() {
        let listing = parse_location(json!({
            "id": "9",
            "attributes": {
                "name": "Camp",
                "latitude": 1.0,
                "longitude": 2.0,
                "region-name": "Utah",
                "photo-urls": "https://img.example/1.jpg",
                "availability-updated-at": "last tuesday"
            }
        }))
        .unwrap();

        assert!(listing.photo_urls.is_empty());
        assert!(listing.availability_updated_at.is_none());
    }
}
