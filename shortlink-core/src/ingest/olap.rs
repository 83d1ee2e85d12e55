//! ClickHouse sink for analytic click rows.
//!
//! Talks to the HTTP interface directly: one `INSERT ... VALUES`
//! statement per flush carries the whole batch. Insert failures are
//! reported but never re-buffered: OLAP divergence is tolerable and
//! reconciled out-of-band.

use std::time::Duration;

use crate::config::OlapConfig;
use crate::{Error, Result};

pub struct OlapSink {
    http: reqwest::Client,
    config: OlapConfig,
}

impl OlapSink {
    pub fn new(config: OlapConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build olap client: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/?user={}&password={}",
            self.config.url, self.config.username, self.config.password
        )
    }

    async fn execute(&self, query: String) -> Result<()> {
        self.http
            .post(self.endpoint())
            .body(query)
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("olap unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Unavailable(format!("olap rejected query: {e}")))?;
        Ok(())
    }

    /// Create the append-only events table if missing. Run once at
    /// worker startup; a failure is retried on the next start.
    pub async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {}.click_events \
             (short_code String, delta Int64, event_time DateTime) \
             ENGINE = MergeTree \
             PARTITION BY toDate(event_time) \
             ORDER BY (short_code, event_time)",
            self.config.database
        );
        self.execute(ddl).await
    }

    /// Bulk-insert one row per aggregated `(code, delta)` pair, all
    /// stamped with the flush time. Returns the number of rows sent.
    pub async fn insert_deltas(&self, deltas: &[(String, i64)]) -> Result<usize> {
        if deltas.is_empty() {
            return Ok(0);
        }

        let event_time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let query = format!(
            "INSERT INTO {}.click_events (short_code, delta, event_time) VALUES {}",
            self.config.database,
            render_rows(deltas, &event_time)
        );

        self.execute(query).await?;
        Ok(deltas.len())
    }
}

/// Render `('code',delta,'ts')` tuples with SQL string escaping.
fn render_rows(deltas: &[(String, i64)], event_time: &str) -> String {
    deltas
        .iter()
        .map(|(code, delta)| {
            let escaped = code.replace('\\', "\\\\").replace('\'', "\\'");
            format!("('{escaped}',{delta},'{event_time}')")
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_render_as_value_tuples() {
        let deltas = vec![("abc".to_string(), 3), ("xyz".to_string(), 1)];
        let rows = render_rows(&deltas, "2024-03-01 12:00:00");
        assert_eq!(
            rows,
            "('abc',3,'2024-03-01 12:00:00'),('xyz',1,'2024-03-01 12:00:00')"
        );
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        let deltas = vec![("a'b\\c".to_string(), 1)];
        let rows = render_rows(&deltas, "2024-03-01 12:00:00");
        assert_eq!(rows, "('a\\'b\\\\c',1,'2024-03-01 12:00:00')");
    }
}
