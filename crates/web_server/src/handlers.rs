use actix_web::{HttpResponse, Result, web};

use campground_crawl::CrawlError;

use crate::crawl_manager::CrawlManager;

/// Registers the crawler routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/health",
        web::get().to(|| async { HttpResponse::Ok().body("OK") }),
    )
    .service(
        web::scope("/api/crawler")
            .route("/status", web::get().to(crawler_status))
            .route("/run", web::post().to(trigger_crawl))
            .route("/cancel", web::post().to(cancel_crawl)),
    );
}

/// Reports the active run's progress and the last finished run
pub async fn crawler_status(manager: web::Data<CrawlManager>) -> Result<HttpResponse, CrawlError> {
    let status = manager.status().await;
    Ok(HttpResponse::Ok().json(status))
}

/// Starts a crawl in the background; 409 while another run is active
pub async fn trigger_crawl(manager: web::Data<CrawlManager>) -> Result<HttpResponse, CrawlError> {
    let run_id = manager.trigger().await?;

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "status": "started",
        "run_id": run_id
    })))
}

/// Cancels the active crawl
pub async fn cancel_crawl(manager: web::Data<CrawlManager>) -> Result<HttpResponse, CrawlError> {
    match manager.cancel().await {
        Some(run_id) => Ok(HttpResponse::Accepted().json(serde_json::json!({
            "status": "cancelling",
            "run_id": run_id
        }))),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": "no_active_run",
            "message": "No crawl run is in progress"
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{OnePerCell, SlowTransport, engine_with};
    use actix_web::{App, http::StatusCode, test};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health() {
        let manager = web::Data::new(CrawlManager::new(engine_with(Arc::new(OnePerCell))));
        let app = test::init_service(App::new().app_data(manager).configure(configure_routes)).await;

        let response = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_run_then_conflict() {
        let manager = web::Data::new(CrawlManager::new(engine_with(Arc::new(SlowTransport))));
        let app = test::init_service(
            App::new()
                .app_data(manager.clone())
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::post().uri("/api/crawler/run").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["status"], "started");
        let run_id = body["run_id"].as_str().unwrap().to_string();

        let request = test::TestRequest::post().uri("/api/crawler/run").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"], "run_in_progress");

        let request = test::TestRequest::get().uri("/api/crawler/status").to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["current_run"]["run_id"], run_id.as_str());

        let request = test::TestRequest::post().uri("/api/crawler/cancel").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        manager.stop().await;
    }

    #[actix_web::test]
    async fn test_cancel_without_run() {
        let manager = web::Data::new(CrawlManager::new(engine_with(Arc::new(OnePerCell))));
        let app = test::init_service(App::new().app_data(manager).configure(configure_routes)).await;

        let request = test::TestRequest::post().uri("/api/crawler/cancel").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
