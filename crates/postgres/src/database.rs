use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

/// Default connection string used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/campground_crawler";

/// Schema statements, applied in order by [`create_tables`].
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campgrounds (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        region_name TEXT NOT NULL,
        administrative_area TEXT,
        nearest_city_name TEXT,
        operator TEXT,
        photo_url TEXT,
        rating DOUBLE PRECISION,
        reviews_count INTEGER NOT NULL DEFAULT 0,
        price_low DOUBLE PRECISION,
        price_high DOUBLE PRECISION,
        address TEXT,
        slug TEXT,
        bookable BOOLEAN NOT NULL DEFAULT FALSE,
        accommodation_type_names TEXT[] NOT NULL DEFAULT '{}',
        camper_types TEXT[] NOT NULL DEFAULT '{}',
        photos_count INTEGER NOT NULL DEFAULT 0,
        photo_urls TEXT[] NOT NULL DEFAULT '{}',
        location_type TEXT,
        availability_updated_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_campgrounds_region_name ON campgrounds (region_name)",
    r#"
    CREATE TABLE IF NOT EXISTS crawl_runs (
        id BIGSERIAL PRIMARY KEY,
        run_id UUID NOT NULL UNIQUE,
        run_date TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        total_campgrounds INTEGER NOT NULL DEFAULT 0,
        new_campgrounds INTEGER NOT NULL DEFAULT 0,
        updated_campgrounds INTEGER NOT NULL DEFAULT 0,
        changed_campgrounds INTEGER NOT NULL DEFAULT 0,
        regions_count INTEGER NOT NULL DEFAULT 0,
        min_latitude DOUBLE PRECISION,
        max_latitude DOUBLE PRECISION,
        min_longitude DOUBLE PRECISION,
        max_longitude DOUBLE PRECISION,
        cells_total INTEGER NOT NULL DEFAULT 0,
        cells_failed INTEGER NOT NULL DEFAULT 0,
        failed_records INTEGER NOT NULL DEFAULT 0,
        duration_seconds DOUBLE PRECISION,
        error_message TEXT,
        finished_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_crawl_runs_run_date ON crawl_runs (run_date DESC)",
];

/// Creates a connection pool to the PostgreSQL database at `database_url`.
pub async fn create_connection_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Tests the database connection by executing a simple query.
pub async fn test_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    let row = sqlx::query("SELECT 1 as test").fetch_one(pool).await?;

    let test_value: i32 = row.try_get("test")?;
    info!("Database connection successful! Test value: {}", test_value);

    Ok(())
}

/// Creates the crawler tables if they do not exist yet.
pub async fn create_tables(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!("Database tables are ready");
    Ok(())
}
