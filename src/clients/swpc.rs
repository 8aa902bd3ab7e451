/// Secondary conditions client (planetary K-index, solar wind, aurora
/// estimate). Never fails: when the provider is unreachable it returns a
/// clearly-labeled synthetic snapshot, because downstream consumers assume at
/// least one data point exists for "current index" calculations.
use crate::clients::Transport;
use crate::domain::{AuroraVisibility, CacheEntry, CurrentConditions, SolarWind};
use crate::errors::{ApiError, ApiResult};
use crate::utils::num;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct SwpcConfig {
    pub base_url: String,
    pub cache_ttl: Duration,
    /// Fixed seed for the synthetic generator; tests inject one so assertions
    /// do not depend on true randomness.
    pub synthetic_seed: Option<u64>,
}

pub struct SwpcClient {
    transport: Arc<dyn Transport>,
    config: SwpcConfig,
    cache: Mutex<Option<CacheEntry<CurrentConditions>>>,
}

impl SwpcClient {
    pub fn new(transport: Arc<dyn Transport>, config: SwpcConfig) -> Self {
        Self {
            transport,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Best-effort current conditions. Never raises.
    pub async fn current_conditions(&self) -> CurrentConditions {
        {
            let cache = self.cache.lock().expect("cache lock poisoned");
            if let Some(entry) = cache.as_ref().filter(|e| e.is_valid()) {
                return entry.data.clone();
            }
        }

        let conditions = match self.fetch_live().await {
            Ok(c) => c,
            Err(e) => {
                warn!("conditions provider unavailable ({}), using synthetic data", e);
                self.synthetic_conditions()
            }
        };

        let mut cache = self.cache.lock().expect("cache lock poisoned");
        *cache = Some(CacheEntry::new(conditions.clone(), self.config.cache_ttl));
        conditions
    }

    async fn fetch_live(&self) -> ApiResult<CurrentConditions> {
        let kp_url = format!("{}/products/noaa-planetary-k-index.json", self.config.base_url);
        let plasma_url = format!("{}/products/solar-wind/plasma-7-day.json", self.config.base_url);
        let mag_url = format!("{}/products/solar-wind/mag-7-day.json", self.config.base_url);

        let (kp_resp, plasma_resp, mag_resp) = tokio::join!(
            self.transport.get_json(&kp_url, &[]),
            self.transport.get_json(&plasma_url, &[]),
            self.transport.get_json(&mag_url, &[]),
        );

        let kp = table_last_value(&kp_resp?.body, 1)
            .ok_or_else(|| ApiError::ProviderUnavailable("empty K-index series".to_string()))?;

        let plasma = plasma_resp?.body;
        let density = table_last_value(&plasma, 1)
            .ok_or_else(|| ApiError::ProviderUnavailable("empty plasma series".to_string()))?;
        let speed = table_last_value(&plasma, 2)
            .ok_or_else(|| ApiError::ProviderUnavailable("empty plasma series".to_string()))?;
        let temperature = table_last_value(&plasma, 3).unwrap_or(100_000.0);

        let field_strength = table_last_value(&mag_resp?.body, 6)
            .ok_or_else(|| ApiError::ProviderUnavailable("empty magnetometer series".to_string()))?;

        Ok(CurrentConditions {
            current_kp: kp,
            solar_wind: SolarWind {
                speed_km_s: speed,
                density,
                temperature,
                field_strength,
            },
            aurora_estimate: aurora_from_kp(kp),
            synthetic: false,
            observed_at: Utc::now(),
        })
    }

    /// Quiet-range synthetic snapshot, generated locally.
    pub fn synthetic_conditions(&self) -> CurrentConditions {
        let mut rng = match self.config.synthetic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let kp = rng.gen_range(1.0..4.0);
        CurrentConditions {
            current_kp: kp,
            solar_wind: SolarWind {
                speed_km_s: rng.gen_range(350.0..450.0),
                density: rng.gen_range(3.0..8.0),
                temperature: rng.gen_range(50_000.0..150_000.0),
                field_strength: rng.gen_range(3.0..7.0),
            },
            aurora_estimate: aurora_from_kp(kp),
            synthetic: true,
            observed_at: Utc::now(),
        }
    }
}

/// SWPC product tables are arrays of rows with a header row first.
fn table_last_value(table: &Value, column: usize) -> Option<f64> {
    table
        .as_array()?
        .iter()
        .skip(1)
        .last()
        .and_then(|row| row.get(column))
        .and_then(num)
}

pub fn aurora_from_kp(kp: f64) -> AuroraVisibility {
    if kp < 3.0 {
        AuroraVisibility::NotVisible
    } else if kp < 5.0 {
        AuroraVisibility::HighLatitudes
    } else if kp < 7.0 {
        AuroraVisibility::MidLatitudes
    } else {
        AuroraVisibility::LowLatitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::testing::MockTransport;
    use serde_json::json;

    fn config(seed: Option<u64>) -> SwpcConfig {
        SwpcConfig {
            base_url: "http://swpc.test".to_string(),
            cache_ttl: Duration::from_secs(60),
            synthetic_seed: seed,
        }
    }

    #[test]
    fn test_table_last_value_skips_header() {
        let table = json!([
            ["time_tag", "Kp"],
            ["2025-08-20 09:00:00.000", "2.33"],
            ["2025-08-20 12:00:00.000", "3.67"]
        ]);
        assert_eq!(table_last_value(&table, 1), Some(3.67));
    }

    #[test]
    fn test_table_last_value_empty_series() {
        let table = json!([["time_tag", "Kp"]]);
        assert_eq!(table_last_value(&table, 1), None);
    }

    #[test]
    fn test_aurora_bands() {
        assert_eq!(aurora_from_kp(1.5), AuroraVisibility::NotVisible);
        assert_eq!(aurora_from_kp(4.0), AuroraVisibility::HighLatitudes);
        assert_eq!(aurora_from_kp(6.0), AuroraVisibility::MidLatitudes);
        assert_eq!(aurora_from_kp(8.5), AuroraVisibility::LowLatitudes);
    }

    #[test]
    fn test_synthetic_is_deterministic_with_seed() {
        let transport = Arc::new(MockTransport::status(500));
        let client = SwpcClient::new(transport, config(Some(42)));

        let a = client.synthetic_conditions();
        let b = client.synthetic_conditions();
        assert_eq!(a.current_kp, b.current_kp);
        assert_eq!(a.solar_wind.speed_km_s, b.solar_wind.speed_km_s);
        assert!(a.synthetic);
        assert!(a.current_kp >= 1.0 && a.current_kp < 4.0);
    }

    #[tokio::test]
    async fn test_provider_down_yields_synthetic() {
        let transport = Arc::new(MockTransport::status(503));
        let client = SwpcClient::new(transport, config(Some(7)));

        let conditions = client.current_conditions().await;
        assert!(conditions.synthetic);
        assert!(conditions.current_kp >= 1.0 && conditions.current_kp < 4.0);
    }

    #[tokio::test]
    async fn test_live_parse_and_cache() {
        let transport = Arc::new(MockTransport::new(|url| {
            let body = if url.contains("k-index") {
                json!([["time_tag", "Kp"], ["2025-08-20 12:00:00.000", "5.33"]])
            } else if url.contains("plasma") {
                json!([
                    ["time_tag", "density", "speed", "temperature"],
                    ["2025-08-20 12:00:00.000", "4.2", "512.3", "98000"]
                ])
            } else {
                json!([
                    ["time_tag", "bx", "by", "bz", "lon", "lat", "bt"],
                    ["2025-08-20 12:00:00.000", "1", "2", "3", "4", "5", "6.1"]
                ])
            };
            Ok(crate::clients::FetchResponse { status: 200, body })
        }));
        let client = SwpcClient::new(transport.clone(), config(None));

        let conditions = client.current_conditions().await;
        assert!(!conditions.synthetic);
        assert_eq!(conditions.current_kp, 5.33);
        assert_eq!(conditions.solar_wind.speed_km_s, 512.3);
        assert_eq!(conditions.solar_wind.field_strength, 6.1);
        assert_eq!(conditions.aurora_estimate, AuroraVisibility::MidLatitudes);

        // Second call inside the TTL comes from cache.
        let calls_after_first = transport.call_count();
        client.current_conditions().await;
        assert_eq!(transport.call_count(), calls_after_first);
    }
}
