/// Business logic services layer
pub mod poller;
pub mod story;

use crate::clients::decode_records;
use crate::clients::donki::{DonkiClient, DonkiEndpoint};
use crate::clients::swpc::SwpcClient;
use crate::domain::{
    ActivityLevel, AuroraVisibility, CacheEntry, CompleteSpaceWeatherData, CurrentConditions,
    FlareRecord, ProcessedWeatherEvent, SolarWind, WeatherSummary,
};
use crate::processing;
use crate::repo::KeyValueStore;
use crate::utils::last_days;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How far back the event feeds are queried.
const LOOKBACK_DAYS: u64 = 7;
const METRICS_HISTORY_MAX: usize = 100;

struct AggregatorState {
    cache: Option<CacheEntry<CompleteSpaceWeatherData>>,
    last_refresh: Option<Instant>,
}

/// Aggregation service fanning out to both providers and double-gating
/// refreshes: a bundle TTL plus a minimum refresh interval that holds even
/// when the TTL has expired, so cache-miss storms cannot hammer providers.
pub struct WeatherService {
    donki: Arc<DonkiClient>,
    swpc: Arc<SwpcClient>,
    store: Arc<dyn KeyValueStore>,
    bundle_ttl: Duration,
    min_refresh: Duration,
    state: tokio::sync::Mutex<AggregatorState>,
}

impl WeatherService {
    pub fn new(
        donki: Arc<DonkiClient>,
        swpc: Arc<SwpcClient>,
        store: Arc<dyn KeyValueStore>,
        bundle_ttl: Duration,
        min_refresh: Duration,
    ) -> Self {
        Self {
            donki,
            swpc,
            store,
            bundle_ttl,
            min_refresh,
            state: tokio::sync::Mutex::new(AggregatorState {
                cache: None,
                last_refresh: None,
            }),
        }
    }

    /// Get the complete bundle. Never fails: serves fresh cache, then stale
    /// cache inside the minimum refresh interval, then a refresh, and as a
    /// last resort the hardcoded quiet-conditions bundle.
    pub async fn get_complete_data(&self) -> CompleteSpaceWeatherData {
        // Lock held across the refresh so concurrent misses share one flight.
        let mut state = self.state.lock().await;

        if let Some(entry) = state.cache.as_ref().filter(|e| e.is_valid()) {
            return entry.data.clone();
        }

        if let (Some(last), Some(entry)) = (state.last_refresh, state.cache.as_ref()) {
            if last.elapsed() < self.min_refresh {
                debug!("inside minimum refresh interval, serving stale bundle");
                return entry.data.clone();
            }
        }

        let started = Instant::now();
        match self.refresh().await {
            Some(bundle) => {
                state.cache = Some(CacheEntry::new(bundle.clone(), self.bundle_ttl));
                state.last_refresh = Some(Instant::now());
                self.record_refresh(&bundle, started.elapsed()).await;
                bundle
            }
            None => {
                warn!("all primary fetches failed, serving fallback bundle");
                state
                    .cache
                    .as_ref()
                    .map(|e| e.data.clone())
                    .unwrap_or_else(fallback_bundle)
            }
        }
    }

    /// Fan out to the five event feeds concurrently, join, and merge with
    /// current conditions. Returns None only when every primary fetch failed.
    async fn refresh(&self) -> Option<CompleteSpaceWeatherData> {
        let (from, to) = last_days(LOOKBACK_DAYS);
        let params = [("startDate", from.as_str()), ("endDate", to.as_str())];

        let (flr, cme, gst, rbe, ips) = tokio::join!(
            self.donki.fetch(DonkiEndpoint::SolarFlares, &params),
            self.donki.fetch(DonkiEndpoint::CoronalMassEjections, &params),
            self.donki.fetch(DonkiEndpoint::GeomagneticStorms, &params),
            self.donki.fetch(DonkiEndpoint::RadioBlackouts, &params),
            self.donki.fetch(DonkiEndpoint::InterplanetaryShocks, &params),
        );

        let results = [&flr, &cme, &gst, &rbe, &ips];
        if results.iter().all(|r| r.is_err()) {
            for r in results {
                if let Err(e) = r {
                    warn!("primary fetch failed: {}", e);
                }
            }
            return None;
        }

        let flares = flr.ok().map(|v| decode_records(&v, "flare")).unwrap_or_default();
        let cmes = cme.ok().map(|v| decode_records(&v, "CME")).unwrap_or_default();
        let storms = gst.ok().map(|v| decode_records(&v, "storm")).unwrap_or_default();
        let radio_blackouts = rbe
            .ok()
            .map(|v| decode_records(&v, "radio blackout"))
            .unwrap_or_default();
        let shocks = ips.ok().map(|v| decode_records(&v, "shock")).unwrap_or_default();

        let conditions = self.swpc.current_conditions().await;
        let summary = build_summary(&conditions, &flares);

        Some(CompleteSpaceWeatherData {
            flares,
            cmes,
            storms,
            radio_blackouts,
            shocks,
            conditions,
            summary,
            fetched_at: Utc::now(),
        })
    }

    /// Best-effort snapshot and metrics through the persistence facade.
    async fn record_refresh(&self, bundle: &CompleteSpaceWeatherData, elapsed: Duration) {
        if let Ok(value) = serde_json::to_value(bundle) {
            if let Err(e) = self.store.set("weather:latest", value, Some(self.bundle_ttl)).await {
                warn!("failed to persist weather snapshot: {}", e);
            }
        }

        let metric = json!({
            "at": bundle.fetched_at,
            "duration_ms": elapsed.as_millis() as u64,
            "events": bundle.flares.len() + bundle.cmes.len() + bundle.storms.len()
                + bundle.radio_blackouts.len(),
        });
        if let Err(e) = self
            .store
            .append("metrics:refresh", metric, METRICS_HISTORY_MAX)
            .await
        {
            warn!("failed to persist refresh metric: {}", e);
        }
    }

    /// Normalize everything currently in the bundle.
    pub async fn process_all_current_data(&self) -> Vec<ProcessedWeatherEvent> {
        let data = self.get_complete_data().await;
        processing::process_all(&data)
    }

    /// The event that should drive story generation right now.
    pub async fn get_most_significant_event(&self) -> Option<ProcessedWeatherEvent> {
        let events = self.process_all_current_data().await;
        let top = processing::most_significant(&events, Utc::now()).cloned();
        if let Some(event) = &top {
            info!("most significant event: {} ({:?})", event.id, event.severity_level);
        }
        top
    }
}

fn build_summary(conditions: &CurrentConditions, flares: &[FlareRecord]) -> WeatherSummary {
    let kp = conditions.current_kp;
    let geomagnetic_activity = if kp > 4.0 {
        ActivityLevel::High
    } else if kp > 2.0 {
        ActivityLevel::Moderate
    } else {
        ActivityLevel::Low
    };

    let strongest = flares
        .iter()
        .filter_map(|f| f.class_type.as_deref())
        .filter_map(|c| {
            processing::parse_flare_class(c).map(|(l, m)| (processing::flare_intensity(l, m), c))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0));

    let flare_activity = match strongest {
        Some((intensity, _)) if intensity >= 30.0 => ActivityLevel::High,
        Some((intensity, _)) if intensity >= 20.0 => ActivityLevel::Moderate,
        _ => ActivityLevel::Low,
    };

    WeatherSummary {
        solar_wind: conditions.solar_wind.clone(),
        geomagnetic_activity,
        storm_probability: (kp * 10.0).min(90.0),
        flare_activity,
        strongest_flare_class: strongest.map(|(_, c)| c.to_string()),
        aurora_visibility: conditions.aurora_estimate,
    }
}

/// Hardcoded quiet-conditions bundle so downstream consumers never see a
/// distinct "no data" state.
fn fallback_bundle() -> CompleteSpaceWeatherData {
    let conditions = CurrentConditions {
        current_kp: 2.0,
        solar_wind: SolarWind {
            speed_km_s: 400.0,
            density: 5.0,
            temperature: 100_000.0,
            field_strength: 5.0,
        },
        aurora_estimate: AuroraVisibility::NotVisible,
        synthetic: true,
        observed_at: Utc::now(),
    };
    let summary = build_summary(&conditions, &[]);
    CompleteSpaceWeatherData {
        flares: Vec::new(),
        cmes: Vec::new(),
        storms: Vec::new(),
        radio_blackouts: Vec::new(),
        shocks: Vec::new(),
        conditions,
        summary,
        fetched_at: Utc::now(),
    }
}
