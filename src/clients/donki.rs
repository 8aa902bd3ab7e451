/// Rate-limited client for the primary space-weather provider (DONKI-style
/// event feeds). Serves cached responses when fresh, spaces outbound calls by
/// a minimum delay, and substitutes a quiet fallback dataset on HTTP 429.
use crate::clients::Transport;
use crate::domain::CacheEntry;
use crate::errors::{ApiError, ApiResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DonkiEndpoint {
    SolarFlares,
    CoronalMassEjections,
    GeomagneticStorms,
    RadioBlackouts,
    InterplanetaryShocks,
}

impl DonkiEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            DonkiEndpoint::SolarFlares => "FLR",
            DonkiEndpoint::CoronalMassEjections => "CME",
            DonkiEndpoint::GeomagneticStorms => "GST",
            DonkiEndpoint::RadioBlackouts => "RBE",
            DonkiEndpoint::InterplanetaryShocks => "IPS",
        }
    }

    /// Dataset substituted when the provider rate-limits us. All event feeds
    /// are arrays, so the quiet fallback is an empty list.
    pub fn fallback_dataset(&self) -> Value {
        Value::Array(Vec::new())
    }
}

#[derive(Clone, Debug)]
pub struct DonkiConfig {
    pub base_url: String,
    pub api_key: String,
    pub rate_limit_delay: Duration,
    pub cache_ttl: Duration,
    pub fallback_ttl: Duration,
}

pub struct DonkiClient {
    transport: Arc<dyn Transport>,
    config: DonkiConfig,
    cache: Mutex<HashMap<String, CacheEntry<Value>>>,
    // Gate serializing outbound calls; held across the pacing sleep.
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl DonkiClient {
    pub fn new(transport: Arc<dyn Transport>, config: DonkiConfig) -> Self {
        Self {
            transport,
            config,
            cache: Mutex::new(HashMap::new()),
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// Fetch one event feed. Cache hits return immediately without touching
    /// the rate gate. Failures are never cached.
    pub async fn fetch(
        &self,
        endpoint: DonkiEndpoint,
        params: &[(&str, &str)],
    ) -> ApiResult<Value> {
        let key = Self::cache_key(endpoint, params);

        if let Some(data) = self.cached(&key) {
            debug!("cache hit for {}", key);
            return Ok(data);
        }

        self.wait_for_rate_gate().await;

        let url = format!("{}/{}", self.config.base_url, endpoint.path());
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !self.config.api_key.is_empty() {
            query.push(("api_key".to_string(), self.config.api_key.clone()));
        }

        let resp = self.transport.get_json(&url, &query).await?;

        match resp.status {
            200..=299 => {
                self.store(key, resp.body.clone(), self.config.cache_ttl);
                Ok(resp.body)
            }
            429 => {
                // Expected condition, not a failure: serve the quiet fallback
                // and re-check sooner than a normal success would.
                warn!("provider rate limited on {}, serving fallback", endpoint.path());
                let fallback = endpoint.fallback_dataset();
                self.store(key, fallback.clone(), self.config.fallback_ttl);
                Ok(fallback)
            }
            status => Err(ApiError::ProviderUnavailable(format!(
                "{} returned status {}",
                endpoint.path(),
                status
            ))),
        }
    }

    fn cache_key(endpoint: DonkiEndpoint, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort();
        let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", endpoint.path(), query.join("&"))
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let cache = self.cache.lock().expect("cache lock poisoned");
        cache.get(key).filter(|e| e.is_valid()).map(|e| e.data.clone())
    }

    fn store(&self, key: String, data: Value, ttl: Duration) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.insert(key, CacheEntry::new(data, ttl));
    }

    /// Sleep until at least `rate_limit_delay` has passed since the previous
    /// outbound call, then claim the slot. The tokio mutex keeps concurrent
    /// callers queued so their starts stay spaced.
    async fn wait_for_rate_gate(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.config.rate_limit_delay {
                tokio::time::sleep(self.config.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
