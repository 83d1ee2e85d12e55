use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative URL record as stored in the `urls` table.
///
/// `short_code` never changes after insert; `clicks` is monotonically
/// non-decreasing and only the ingestion worker writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Url {
    /// Build a fresh record about to be inserted.
    #[must_use]
    pub fn new(id: i64, short_code: String, original_url: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            short_code,
            original_url,
            clicks: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Self-sufficient cache snapshot of a URL record.
///
/// The redirect path serves entirely from this payload on a hit; it
/// never dereferences the OLTP row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUrlPayload {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Url> for CachedUrlPayload {
    fn from(url: &Url) -> Self {
        Self {
            id: url.id,
            short_code: url.short_code.clone(),
            original_url: url.original_url.clone(),
            clicks: url.clicks,
            created_at: url.created_at,
            updated_at: url.updated_at,
        }
    }
}

impl From<CachedUrlPayload> for Url {
    fn from(payload: CachedUrlPayload) -> Self {
        Self {
            id: payload.id,
            short_code: payload.short_code,
            original_url: payload.original_url,
            clicks: payload.clicks,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_payload_round_trips_through_json() {
        let url = Url::new(42, "aB3xK9m".to_string(), "https://example.com".to_string());
        let payload = CachedUrlPayload::from(&url);

        let json = serde_json::to_string(&payload).unwrap();
        let decoded: CachedUrlPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, payload);
        assert_eq!(Url::from(decoded), url);
    }

    #[test]
    fn timestamps_serialize_as_utc_iso8601() {
        let url = Url::new(1, "gh".to_string(), "https://x".to_string());
        let json = serde_json::to_value(CachedUrlPayload::from(&url)).unwrap();
        let created = json["created_at"].as_str().unwrap();
        // RFC 3339 with a Z or +00:00 suffix
        assert!(created.ends_with('Z') || created.ends_with("+00:00"));
    }
}
