//! HTTP client for the allocator service, used by edge minters to
//! refill their local id blocks.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::service::allocator::IdRange;
use crate::service::RangeSource;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct AllocateResponse {
    start: i64,
    end: i64,
}

/// `RangeSource` backed by `POST <allocator>/allocate`.
#[derive(Clone)]
pub struct HttpRangeSource {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRangeSource {
    /// `base_url` without a trailing slash, e.g. `http://allocator:8010`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build allocator client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn allocate(&self, size: i64) -> Result<IdRange> {
        let url = format!("{}/allocate", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "size": size }))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("allocator unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Unavailable(format!("allocator refused request: {e}")))?;

        let payload: AllocateResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("invalid allocator response: {e}")))?;

        if payload.end - payload.start + 1 != size {
            return Err(Error::Internal(format!(
                "allocator returned malformed range {}..={} for size {size}",
                payload.start, payload.end
            )));
        }

        Ok(IdRange {
            start: payload.start,
            end: payload.end,
        })
    }
}
