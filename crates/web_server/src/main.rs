//! Main entry point for the campground crawler server.
//! This crate exposes the crawler status and trigger endpoints and runs the
//! daily crawl schedule.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, middleware::Logger, web};
use campground_crawl::{CrawlConfig, CrawlEngine, DyrtClient, PgCampgroundStore};
use postgres::database::*;

mod crawl_manager;
mod handlers;
#[cfg(test)]
mod test_support;

use crawl_manager::{CrawlManager, MAX_SCHEDULE_PERIOD};
use handlers::configure_routes;

const DEFAULT_INTERVAL_HOURS: u64 = 24;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting campground crawler server...");

    let config = match CrawlConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ Invalid crawl configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Create database connection pool
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let pool = match create_connection_pool(&database_url).await {
        Ok(pool) => {
            log::info!("🗃️ Database pool created successfully");

            if let Err(e) = test_connection(&pool).await {
                log::error!("❌ Database connection test failed: {}", e);
            }
            pool
        }
        Err(e) => {
            log::error!("❌ Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = create_tables(&pool).await {
        log::error!("❌ Failed to create database tables: {}", e);
        std::process::exit(1);
    }

    let transport = match DyrtClient::new(std::env::var("DYRT_BASE_URL").ok(), config.page_size) {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ Failed to create search client: {}", e);
            std::process::exit(1);
        }
    };

    let engine = match CrawlEngine::new(
        config,
        Arc::new(transport),
        Arc::new(PgCampgroundStore::new(pool)),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("❌ Failed to create crawl engine: {}", e);
            std::process::exit(1);
        }
    };

    let period = schedule_period(std::env::var("CRAWL_INTERVAL_HOURS").ok());

    let manager = Arc::new(CrawlManager::new(engine));
    manager.start_scheduler(period).await;
    log::info!("🕒 Crawl scheduled every {} hours", period.as_secs() / 3600);

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    log::info!("🌐 Server will be available at: http://{}", bind_address);

    let data = web::Data::from(manager.clone());
    let result = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await;

    manager.stop().await;
    result
}

/// Interval between scheduled crawls from `CRAWL_INTERVAL_HOURS`.
/// Unset, unparseable or zero values fall back to the default.
fn schedule_period(raw: Option<String>) -> Duration {
    let hours = raw
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_INTERVAL_HOURS);

    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .map_or(MAX_SCHEDULE_PERIOD, |period| period.min(MAX_SCHEDULE_PERIOD))
}
