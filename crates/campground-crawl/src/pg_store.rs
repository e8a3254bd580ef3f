use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::crawl_types::{CampgroundRecord, CrawlError, RawListing, RunStats, UpsertOutcome};
use crate::store::CampgroundStore;

const SELECT_CAMPGROUND: &str = r#"
    SELECT
        id, name, latitude, longitude, region_name, administrative_area,
        nearest_city_name, operator, photo_url, rating, reviews_count,
        price_low, price_high, address, slug, bookable,
        accommodation_type_names, camper_types, photos_count,
        photo_urls, location_type, availability_updated_at,
        created_at, updated_at
    FROM campgrounds
    WHERE id = $1
"#;

/// PostgreSQL-backed campground store
///
/// Expects the `campgrounds` and `crawl_runs` tables created by
/// `postgres::database::create_tables`.
#[derive(Clone)]
pub struct PgCampgroundStore {
    pool: PgPool,
}

impl PgCampgroundStore {
    /// Wraps an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampgroundStore for PgCampgroundStore {
    async fn get(&self, id: &str) -> Result<Option<CampgroundRecord>, CrawlError> {
        let record = sqlx::query_as::<_, CampgroundRecord>(SELECT_CAMPGROUND)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn upsert(
        &self,
        listing: &RawListing,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, CrawlError> {
        let mut tx = self.pool.begin().await?;

        // Row lock so a concurrent writer waits for our classification
        let existing = sqlx::query_as::<_, CampgroundRecord>(&format!(
            "{} FOR UPDATE",
            SELECT_CAMPGROUND
        ))
        .bind(&listing.id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO campgrounds (
                id, name, latitude, longitude, region_name, administrative_area,
                nearest_city_name, operator, photo_url, rating, reviews_count,
                price_low, price_high, address, slug, bookable,
                accommodation_type_names, camper_types, photos_count,
                photo_urls, location_type, availability_updated_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $23)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                region_name = EXCLUDED.region_name,
                administrative_area = EXCLUDED.administrative_area,
                nearest_city_name = EXCLUDED.nearest_city_name,
                operator = EXCLUDED.operator,
                photo_url = EXCLUDED.photo_url,
                rating = EXCLUDED.rating,
                reviews_count = EXCLUDED.reviews_count,
                price_low = EXCLUDED.price_low,
                price_high = EXCLUDED.price_high,
                address = EXCLUDED.address,
                slug = EXCLUDED.slug,
                bookable = EXCLUDED.bookable,
                accommodation_type_names = EXCLUDED.accommodation_type_names,
                camper_types = EXCLUDED.camper_types,
                photos_count = EXCLUDED.photos_count,
                photo_urls = EXCLUDED.photo_urls,
                location_type = EXCLUDED.location_type,
                availability_updated_at = EXCLUDED.availability_updated_at,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.name)
        .bind(listing.latitude)
        .bind(listing.longitude)
        .bind(&listing.region_name)
        .bind(&listing.administrative_area)
        .bind(&listing.nearest_city_name)
        .bind(&listing.operator)
        .bind(&listing.photo_url)
        .bind(listing.rating)
        .bind(listing.reviews_count)
        .bind(listing.price_low)
        .bind(listing.price_high)
        .bind(&listing.address)
        .bind(&listing.slug)
        .bind(listing.bookable)
        .bind(&listing.accommodation_type_names)
        .bind(&listing.camper_types)
        .bind(listing.photos_count)
        .bind(&listing.photo_urls)
        .bind(&listing.location_type)
        .bind(listing.availability_updated_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        tx.commit().await?;

        if inserted {
            debug!("Inserted campground {}", listing.id);
            return Ok(UpsertOutcome::New);
        }

        let changed = existing.is_none_or(|record| record.to_listing() != *listing);
        Ok(UpsertOutcome::Updated { changed })
    }

    async fn record_run(&self, stats: &RunStats) -> Result<i64, CrawlError> {
        let id = match stats.id {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO crawl_runs (
                        run_id, run_date, status, total_campgrounds, new_campgrounds,
                        updated_campgrounds, changed_campgrounds, regions_count,
                        min_latitude, max_latitude, min_longitude, max_longitude,
                        cells_total, cells_failed, failed_records, duration_seconds,
                        error_message, finished_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                            $15, $16, $17, $18)
                    RETURNING id
                    "#,
                )
                .bind(stats.run_id)
                .bind(stats.run_date)
                .bind(stats.status.as_str())
                .bind(stats.total_campgrounds)
                .bind(stats.new_campgrounds)
                .bind(stats.updated_campgrounds)
                .bind(stats.changed_campgrounds)
                .bind(stats.regions_count)
                .bind(stats.min_latitude)
                .bind(stats.max_latitude)
                .bind(stats.min_longitude)
                .bind(stats.max_longitude)
                .bind(stats.cells_total)
                .bind(stats.cells_failed)
                .bind(stats.failed_records)
                .bind(stats.duration_seconds)
                .bind(&stats.error_message)
                .bind(stats.finished_at)
                .fetch_one(&self.pool)
                .await?;

                row.try_get::<i64, _>("id")?
            }
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE crawl_runs SET
                        status = $2,
                        total_campgrounds = $3,
                        new_campgrounds = $4,
                        updated_campgrounds = $5,
                        changed_campgrounds = $6,
                        regions_count = $7,
                        min_latitude = $8,
                        max_latitude = $9,
                        min_longitude = $10,
                        max_longitude = $11,
                        cells_total = $12,
                        cells_failed = $13,
                        failed_records = $14,
                        duration_seconds = $15,
                        error_message = $16,
                        finished_at = $17
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(stats.status.as_str())
                .bind(stats.total_campgrounds)
                .bind(stats.new_campgrounds)
                .bind(stats.updated_campgrounds)
                .bind(stats.changed_campgrounds)
                .bind(stats.regions_count)
                .bind(stats.min_latitude)
                .bind(stats.max_latitude)
                .bind(stats.min_longitude)
                .bind(stats.max_longitude)
                .bind(stats.cells_total)
                .bind(stats.cells_failed)
                .bind(stats.failed_records)
                .bind(stats.duration_seconds)
                .bind(&stats.error_message)
                .bind(stats.finished_at)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(CrawlError::Persistence(format!("Run {} not found", id)));
                }
                id
            }
        };

        debug!("Recorded run {} as row {} ({})", stats.run_id, id, stats.status.as_str());
        Ok(id)
    }
}
