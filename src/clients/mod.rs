/// External API clients module
pub mod donki;
pub mod swpc;

use crate::errors::{ApiError, ApiResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Raw HTTP outcome handed back to clients. The transport only moves bytes;
/// clients own policy (429 fallback, caching, error propagation).
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> ApiResult<FetchResponse>;
}

/// reqwest-backed transport with common configuration.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("stellar-stories/0.1")
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> ApiResult<FetchResponse> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status().as_u16();
        // Error statuses often carry non-JSON bodies
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok(FetchResponse { status, body })
    }
}

/// Decode a provider array element-by-element so one malformed record never
/// poisons the batch.
pub fn decode_records<T: DeserializeOwned>(value: &Value, what: &str) -> Vec<T> {
    let Some(items) = value.as_array() else {
        warn!("{} payload was not an array, treating as empty", what);
        return Vec::new();
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping malformed {} record: {}", what, e),
        }
    }
    records
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Handler = Box<dyn Fn(&str) -> ApiResult<FetchResponse> + Send + Sync>;

    /// Call-counting transport for cache/rate-limit assertions.
    pub struct MockTransport {
        calls: AtomicUsize,
        handler: Handler,
    }

    impl MockTransport {
        pub fn new(handler: impl Fn(&str) -> ApiResult<FetchResponse> + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                handler: Box::new(handler),
            }
        }

        pub fn ok(body: Value) -> Self {
            Self::new(move |_| {
                Ok(FetchResponse {
                    status: 200,
                    body: body.clone(),
                })
            })
        }

        pub fn status(status: u16) -> Self {
            Self::new(move |_| {
                Ok(FetchResponse {
                    status,
                    body: Value::Null,
                })
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get_json(
            &self,
            url: &str,
            _query: &[(String, String)],
        ) -> ApiResult<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.handler)(url)
        }
    }

    #[test]
    fn test_decode_records_skips_malformed() {
        use crate::domain::FlareRecord;

        let payload = serde_json::json!([
            {"flrID": "2025-08-20T12:00:00-FLR-001", "classType": "M2.1"},
            {"noId": true},
            {"flrID": "2025-08-20T14:00:00-FLR-002"}
        ]);

        let records: Vec<FlareRecord> = decode_records(&payload, "flare");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].flr_id, "2025-08-20T12:00:00-FLR-001");
    }

    #[test]
    fn test_decode_records_non_array() {
        use crate::domain::FlareRecord;

        let records: Vec<FlareRecord> = decode_records(&serde_json::json!({"x": 1}), "flare");
        assert!(records.is_empty());
    }
}
