/// Application configuration module
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub donki_base_url: String,
    pub donki_api_key: String,
    pub swpc_base_url: String,
    pub generation_api_url: String,
    pub generation_api_key: String,
    pub generation_models: Vec<String>,
    pub timings: Timings,
}

/// Every TTL, delay and interval in one place so clients and services can be
/// constructed with explicit values in tests.
#[derive(Clone, Debug)]
pub struct Timings {
    pub rate_limit_delay_ms: u64,
    pub fetch_cache_ttl_secs: u64,
    pub fallback_cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub conditions_ttl_secs: u64,
    pub bundle_ttl_secs: u64,
    pub min_refresh_secs: u64,
    pub poll_interval_minutes: u64,
    pub generation_timeout_secs: u64,
    pub story_history_max: usize,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok();

        let donki_base_url = env::var("DONKI_BASE_URL")
            .unwrap_or_else(|_| "https://api.nasa.gov/DONKI".to_string());

        let donki_api_key = env::var("NASA_API_KEY").unwrap_or_else(|_| "DEMO_KEY".to_string());

        let swpc_base_url = env::var("SWPC_BASE_URL")
            .unwrap_or_else(|_| "https://services.swpc.noaa.gov".to_string());

        let generation_api_url = env::var("GENERATION_API_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1/chat/completions".to_string());

        let generation_api_key = env::var("GENERATION_API_KEY").unwrap_or_default();

        let generation_models = env::var("GENERATION_MODELS")
            .unwrap_or_else(|_| {
                "meta-llama/llama-3.1-8b-instruct:free,google/gemma-2-9b-it:free".to_string()
            })
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let timings = Timings {
            rate_limit_delay_ms: env_u64("RATE_LIMIT_DELAY_MS", 2_000),
            fetch_cache_ttl_secs: env_u64("FETCH_CACHE_TTL_SECONDS", 1_800), // 30m
            fallback_cache_ttl_secs: env_u64("FALLBACK_CACHE_TTL_SECONDS", 300), // 5m
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECONDS", 10),
            conditions_ttl_secs: env_u64("CONDITIONS_TTL_SECONDS", 600), // 10m
            bundle_ttl_secs: env_u64("BUNDLE_TTL_SECONDS", 900),         // 15m
            min_refresh_secs: env_u64("MIN_REFRESH_SECONDS", 600),       // 10m
            poll_interval_minutes: env_u64("POLL_INTERVAL_MINUTES", 30),
            generation_timeout_secs: env_u64("GENERATION_TIMEOUT_SECONDS", 10),
            story_history_max: env_u64("STORY_HISTORY_MAX", 50) as usize,
        };

        Ok(Self {
            database_url,
            donki_base_url,
            donki_api_key,
            swpc_base_url,
            generation_api_url,
            generation_api_key,
            generation_models,
            timings,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
