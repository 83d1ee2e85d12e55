use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{metrics, models::Url, service::UrlStore, Error, Result};

/// URL repository for database operations
#[derive(Clone)]
pub struct UrlRepository {
    pool: PgPool,
}

impl UrlRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new URL record.
    ///
    /// The id comes from the range allocator, so the insert is
    /// optimistic: a unique violation on `short_code` maps to
    /// `AlreadyExists` and the caller decides whether to retry.
    pub async fn insert(&self, url: &Url) -> Result<Url> {
        let timer = metrics::database::DB_QUERY_DURATION
            .with_label_values(&["insert"])
            .start_timer();

        let row = sqlx::query(
            r"
            INSERT INTO urls (id, short_code, original_url, clicks, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, short_code, original_url, clicks, created_at, updated_at
            ",
        )
        .bind(url.id)
        .bind(&url.short_code)
        .bind(&url.original_url)
        .bind(url.clicks)
        .bind(url.created_at)
        .bind(url.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            metrics::database::DB_QUERY_ERRORS
                .with_label_values(&["insert"])
                .inc();
            Error::from(e)
        })?;

        timer.observe_duration();
        Self::row_to_url(&row)
    }

    /// Get a URL record by its short code.
    pub async fn get_by_code(&self, short_code: &str) -> Result<Option<Url>> {
        let timer = metrics::database::DB_QUERY_DURATION
            .with_label_values(&["get_by_code"])
            .start_timer();

        let row = sqlx::query(
            r"
            SELECT id, short_code, original_url, clicks, created_at, updated_at
            FROM urls
            WHERE short_code = $1
            ",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::database::DB_QUERY_ERRORS
                .with_label_values(&["get_by_code"])
                .inc();
            Error::from(e)
        })?;

        timer.observe_duration();
        match row {
            Some(row) => Ok(Some(Self::row_to_url(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a batch of click deltas in one statement and return the
    /// updated records, so callers can refresh cache snapshots without
    /// a second read.
    ///
    /// Codes with no matching row are silently dropped (the URL was
    /// never created or the event was forged); this keeps the flush
    /// loop alive on junk input.
    pub async fn apply_click_deltas(&self, deltas: &[(String, i64)]) -> Result<Vec<Url>> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }

        let timer = metrics::database::DB_QUERY_DURATION
            .with_label_values(&["apply_click_deltas"])
            .start_timer();

        let codes: Vec<&str> = deltas.iter().map(|(code, _)| code.as_str()).collect();
        let amounts: Vec<i64> = deltas.iter().map(|(_, delta)| *delta).collect();

        let rows = sqlx::query(
            r"
            UPDATE urls
            SET clicks = urls.clicks + d.delta,
                updated_at = now()
            FROM (SELECT unnest($1::text[]) AS code, unnest($2::bigint[]) AS delta) AS d
            WHERE urls.short_code = d.code
            RETURNING urls.id, urls.short_code, urls.original_url, urls.clicks,
                      urls.created_at, urls.updated_at
            ",
        )
        .bind(&codes)
        .bind(&amounts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            metrics::database::DB_QUERY_ERRORS
                .with_label_values(&["apply_click_deltas"])
                .inc();
            Error::from(e)
        })?;

        timer.observe_duration();
        rows.iter().map(Self::row_to_url).collect()
    }

    /// Top-N records by click count, for the cache warmer.
    pub async fn top_by_clicks(&self, limit: i64) -> Result<Vec<Url>> {
        let timer = metrics::database::DB_QUERY_DURATION
            .with_label_values(&["top_by_clicks"])
            .start_timer();

        let rows = sqlx::query(
            r"
            SELECT id, short_code, original_url, clicks, created_at, updated_at
            FROM urls
            ORDER BY clicks DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            metrics::database::DB_QUERY_ERRORS
                .with_label_values(&["top_by_clicks"])
                .inc();
            Error::from(e)
        })?;

        timer.observe_duration();
        rows.iter().map(Self::row_to_url).collect()
    }

    /// Records for a set of short codes, for warming from the hot set.
    pub async fn get_by_codes(&self, short_codes: &[String]) -> Result<Vec<Url>> {
        if short_codes.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r"
            SELECT id, short_code, original_url, clicks, created_at, updated_at
            FROM urls
            WHERE short_code = ANY($1)
            ",
        )
        .bind(short_codes)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_url).collect()
    }

    fn row_to_url(row: &PgRow) -> Result<Url> {
        Ok(Url {
            id: row.try_get("id")?,
            short_code: row.try_get("short_code")?,
            original_url: row.try_get("original_url")?,
            clicks: row.try_get("clicks")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl UrlStore for UrlRepository {
    async fn insert(&self, url: &Url) -> Result<Url> {
        Self::insert(self, url).await
    }

    async fn get_by_code(&self, short_code: &str) -> Result<Option<Url>> {
        Self::get_by_code(self, short_code).await
    }

    async fn apply_click_deltas(&self, deltas: &[(String, i64)]) -> Result<Vec<Url>> {
        Self::apply_click_deltas(self, deltas).await
    }

    async fn top_by_clicks(&self, limit: i64) -> Result<Vec<Url>> {
        Self::top_by_clicks(self, limit).await
    }

    async fn get_by_codes(&self, short_codes: &[String]) -> Result<Vec<Url>> {
        Self::get_by_codes(self, short_codes).await
    }
}
