/// Domain models for the application
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Five-step qualitative severity classification.
///
/// Ordering matters: significance filters and monotonicity checks rely on
/// `Minor < Moderate < Strong < Severe < Extreme`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Minor,
    Moderate,
    Strong,
    Severe,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SolarFlare,
    Cme,
    GeomagneticStorm,
    RadioBlackout,
    Aurora,
}

impl EventType {
    /// Prefix used for deterministic processed-event ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EventType::SolarFlare => "FLR",
            EventType::Cme => "CME",
            EventType::GeomagneticStorm => "GST",
            EventType::RadioBlackout => "RBE",
            EventType::Aurora => "AUR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// Solar flare record as returned by the primary provider (DONKI FLR shape).
/// Times stay as provider strings until normalization; payloads are lenient so
/// one malformed record never poisons a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlareRecord {
    #[serde(rename = "flrID")]
    pub flr_id: String,
    #[serde(default)]
    pub class_type: Option<String>,
    #[serde(default)]
    pub begin_time: Option<String>,
    #[serde(default)]
    pub peak_time: Option<String>,
    #[serde(default)]
    pub source_location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmeAnalysis {
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub is_most_accurate: bool,
}

/// Coronal mass ejection record (DONKI CME shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmeRecord {
    #[serde(rename = "activityID")]
    pub activity_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub cme_analyses: Vec<CmeAnalysis>,
    #[serde(default)]
    pub note: Option<String>,
}

impl CmeRecord {
    /// Propagation speed in km/s, preferring the analysis flagged most accurate.
    pub fn speed(&self) -> Option<f64> {
        self.cme_analyses
            .iter()
            .find(|a| a.is_most_accurate)
            .or_else(|| self.cme_analyses.first())
            .and_then(|a| a.speed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpReading {
    #[serde(default)]
    pub observed_time: Option<String>,
    pub kp_index: f64,
}

/// Geomagnetic storm record (DONKI GST shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StormRecord {
    #[serde(rename = "gstID")]
    pub gst_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub all_kp_index: Vec<KpReading>,
}

/// Radio blackout record carrying a NOAA R-scale designation ("R1".."R5").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioBlackoutRecord {
    #[serde(rename = "rbeID")]
    pub rbe_id: String,
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default)]
    pub begin_time: Option<String>,
}

/// Interplanetary shock record. Kept in the aggregate bundle for display but
/// not scored into a processed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockRecord {
    #[serde(rename = "activityID")]
    pub activity_id: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
}

/// Original provider record, retained on processed events for display/debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEventRecord {
    Flare(FlareRecord),
    Cme(CmeRecord),
    Storm(StormRecord),
    RadioBlackout(RadioBlackoutRecord),
}

/// Tags seeded during normalization that drive story generation downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryContext {
    pub characters: Vec<String>,
    pub educational_topics: Vec<String>,
    pub difficulty: Difficulty,
    pub impact_level: SeverityLevel,
}

/// A raw provider record normalized into the common severity model.
/// Never mutated after normalization; the same raw record always yields the
/// same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedWeatherEvent {
    pub id: String,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub intensity: f64,
    pub severity_level: SeverityLevel,
    pub story_context: StoryContext,
    pub source_data: RawEventRecord,
}

/// In-process cache slot. Valid iff `now < expires_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        let timestamp = Instant::now();
        Self {
            data,
            timestamp,
            expires_at: timestamp + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarWind {
    pub speed_km_s: f64,
    pub density: f64,
    pub temperature: f64,
    pub field_strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuroraVisibility {
    NotVisible,
    HighLatitudes,
    MidLatitudes,
    LowLatitudes,
}

/// Best-effort snapshot from the secondary provider. `synthetic` marks values
/// that came from the local generator rather than the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub current_kp: f64,
    pub solar_wind: SolarWind,
    pub aurora_estimate: AuroraVisibility,
    pub synthetic: bool,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub solar_wind: SolarWind,
    pub geomagnetic_activity: ActivityLevel,
    pub storm_probability: f64,
    pub flare_activity: ActivityLevel,
    pub strongest_flare_class: Option<String>,
    pub aurora_visibility: AuroraVisibility,
}

/// Everything the UI needs in one bundle. Owned by the aggregation service;
/// consumers get clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteSpaceWeatherData {
    pub flares: Vec<FlareRecord>,
    pub cmes: Vec<CmeRecord>,
    pub storms: Vec<StormRecord>,
    pub radio_blackouts: Vec<RadioBlackoutRecord>,
    pub shocks: Vec<ShockRecord>,
    pub conditions: CurrentConditions,
    pub summary: WeatherSummary,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Kids,
    Tweens,
    Teens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorySize {
    Short,
    Medium,
    Long,
}

/// Incoming story request from the UI layer.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryRequest {
    pub character: String,
    pub age_group: AgeGroup,
    pub story_size: StorySize,
    #[serde(default)]
    pub event_context: Option<ProcessedWeatherEvent>,
}

/// A narrated story, either AI-generated or selected from the fallback pool.
/// Never mutated after creation; regeneration creates a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedStory {
    pub id: Uuid,
    pub title: String,
    pub story: String,
    pub character: String,
    pub age_group: AgeGroup,
    pub educational_facts: Vec<String>,
    pub source_event_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub is_fallback: bool,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<Utc>,
}
