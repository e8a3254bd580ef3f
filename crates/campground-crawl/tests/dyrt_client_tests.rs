//! Integration tests for the TheDyrt HTTP transport
//!
//! These tests use wiremock to stand in for the location search API.

use std::sync::Arc;
use std::time::Duration;

use campground_crawl::*;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH_PATH: &str = "/api/v6/locations/search-results";

/// First cell of the continental grid at 10 degrees: 24.5..34.5, -125..-115
fn first_cell() -> Cell {
    GridPartition::new("continental", CONTINENTAL_US, 10.0, 0)
        .next()
        .expect("grid has cells")
}

fn location(id: &str) -> Value {
    json!({
        "id": id,
        "type": "location-search-results",
        "attributes": {
            "name": format!("Camp {}", id),
            "latitude": 33.9,
            "longitude": -116.2,
            "region-name": "California",
            "administrative-area": "Joshua Tree National Park",
            "operator": "National Park Service",
            "rating": 4.4,
            "reviews-count": 120,
            "bookable": true,
            "accommodation-type-names": ["tent", "rv"]
        }
    })
}

fn page(ids: &[&str]) -> ResponseTemplate {
    let data: Vec<Value> = ids.iter().map(|id| location(id)).collect();
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

fn client_for(server: &MockServer, page_size: u32) -> DyrtClient {
    DyrtClient::new(Some(format!("{}/api/v6", server.uri())), page_size).expect("client builds")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        rate_limit_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_sends_bounds_and_paging_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("ne", "34.5,-115"))
        .and(query_param("sw", "24.5,-125"))
        .and(query_param("page[size]", "30"))
        .and(query_param("page[number]", "1"))
        .respond_with(page(&["101", "102"]))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server, 30)
        .fetch_campgrounds_by_bounds(&first_cell(), 1)
        .await
        .expect("page fetched");

    assert_eq!(result.listings.len(), 2);
    assert_eq!(result.listings[0].id, "101");
    assert_eq!(
        result.listings[0].administrative_area.as_deref(),
        Some("Joshua Tree National Park")
    );
    assert!(result.listings[0].bookable);
    // A short page ends pagination
    assert!(result.next_page.is_none());
}

#[tokio::test]
async fn test_full_pages_are_followed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "1"))
        .respond_with(page(&["1", "2"]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "2"))
        .respond_with(page(&["3"]))
        .mount(&server)
        .await;

    let client = SearchClient::new(Arc::new(client_for(&server, 2)), fast_retry(), None);
    let result = client.fetch_cell(&first_cell(), &CancellationToken::new()).await;

    assert!(result.error.is_none());
    assert_eq!(result.pages, 2);
    let ids: Vec<&str> = result.listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_page_of_malformed_locations_does_not_end_the_cell() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "broken-1", "attributes": { "name": "No Coordinates" } },
                { "id": "broken-2" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "2"))
        .respond_with(page(&["9"]))
        .mount(&server)
        .await;

    let client = SearchClient::new(Arc::new(client_for(&server, 2)), fast_retry(), None);
    let result = client.fetch_cell(&first_cell(), &CancellationToken::new()).await;

    assert!(result.error.is_none());
    assert_eq!(result.pages, 2);
    assert_eq!(result.listings.len(), 1);
    assert_eq!(result.listings[0].id, "9");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(page(&["7"]))
        .mount(&server)
        .await;

    let client = SearchClient::new(Arc::new(client_for(&server, 30)), fast_retry(), None);
    let result = client.fetch_cell(&first_cell(), &CancellationToken::new()).await;

    assert!(result.error.is_none());
    assert_eq!(result.listings.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = SearchClient::new(Arc::new(client_for(&server, 30)), fast_retry(), None);
    let result = client.fetch_cell(&first_cell(), &CancellationToken::new()).await;

    assert!(matches!(result.error, Some(CrawlError::AuthenticationFailed)));
    assert!(result.error.unwrap().is_fatal());
}

#[tokio::test]
async fn test_rate_limit_and_bad_bodies_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "1"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page[number]", "3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server, 30);
    let cell = first_cell();

    assert!(matches!(
        client.fetch_campgrounds_by_bounds(&cell, 1).await,
        Err(CrawlError::RateLimited)
    ));
    assert!(matches!(
        client.fetch_campgrounds_by_bounds(&cell, 2).await,
        Err(CrawlError::DataFormat(_))
    ));
    assert!(matches!(
        client.fetch_campgrounds_by_bounds(&cell, 3).await,
        Err(CrawlError::Fatal(_))
    ));
}

#[tokio::test]
async fn test_incomplete_locations_are_dropped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                location("1"),
                { "id": "2", "attributes": { "name": "No Coordinates", "region-name": "Utah" } },
                { "id": "3", "attributes": { "latitude": 1.0, "longitude": 2.0, "region-name": "Utah" } }
            ]
        })))
        .mount(&server)
        .await;

    let result = client_for(&server, 30)
        .fetch_campgrounds_by_bounds(&first_cell(), 1)
        .await
        .expect("page fetched");

    assert_eq!(result.listings.len(), 1);
    assert_eq!(result.listings[0].id, "1");
}

#[tokio::test]
async fn test_crawl_over_http_into_memory_store() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(page(&["shared"]))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCampgroundStore::new());
    let config = CrawlConfig {
        grid_size: 10.0,
        retry: fast_retry(),
        ..CrawlConfig::default()
    };

    let stats = run_crawl(config, Arc::new(client_for(&server, 30)), store.clone()).await;

    assert_eq!(stats.status, RunStatus::Completed);
    assert_eq!(stats.cells_total, 18);
    assert_eq!(stats.total_campgrounds, 1);
    assert_eq!(stats.new_campgrounds, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 18);
}
