/// Event normalization and scoring. Converts heterogeneous provider records
/// into `ProcessedWeatherEvent`s with a deterministic 0-100 intensity and a
/// five-level severity classification. Scoring rules are load-bearing for
/// downstream story selection; do not adjust thresholds casually.
use crate::domain::{
    CmeRecord, CompleteSpaceWeatherData, Difficulty, EventType, FlareRecord,
    ProcessedWeatherEvent, RadioBlackoutRecord, RawEventRecord, SeverityLevel, StormRecord,
    StoryContext,
};
use crate::errors::{ApiError, ApiResult};
use crate::utils::parse_event_time;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Events at or above this intensity (or Severe+) gate notifications.
pub const SIGNIFICANT_INTENSITY: f64 = 30.0;

const DEFAULT_CME_SPEED: f64 = 300.0;

/// Split a flare class designation ("M2.1") into letter and magnitude.
/// A bare letter counts as magnitude 1.0; a non-numeric suffix is malformed.
pub fn parse_flare_class(class: &str) -> Option<(char, f64)> {
    let mut chars = class.trim().chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if !matches!(letter, 'A' | 'B' | 'C' | 'M' | 'X') {
        return None;
    }
    let suffix = chars.as_str().trim();
    let magnitude = if suffix.is_empty() {
        1.0
    } else {
        suffix.parse::<f64>().ok()?
    };
    Some((letter, magnitude))
}

/// Class letter base offset plus magnitude. The magnitude contribution is
/// capped at 60 for X-class only, so X tops out at 100; out-of-range
/// magnitudes on lower classes (e.g. "M15" -> 45) intentionally overflow
/// their band rather than being clamped.
pub fn flare_intensity(letter: char, magnitude: f64) -> f64 {
    let base = match letter {
        'A' => 0.0,
        'B' => 10.0,
        'C' => 20.0,
        'M' => 30.0,
        _ => 40.0,
    };
    if letter == 'X' {
        base + magnitude.min(60.0)
    } else {
        base + magnitude
    }
}

pub fn flare_severity(letter: char, intensity: f64) -> SeverityLevel {
    // Any X-class flare is extreme regardless of where its intensity lands.
    if letter == 'X' {
        return SeverityLevel::Extreme;
    }
    if intensity < 15.0 {
        SeverityLevel::Minor
    } else if intensity < 25.0 {
        SeverityLevel::Moderate
    } else if intensity < 35.0 {
        SeverityLevel::Strong
    } else if intensity < 45.0 {
        SeverityLevel::Severe
    } else {
        SeverityLevel::Extreme
    }
}

pub fn cme_intensity(speed_km_s: f64) -> f64 {
    (speed_km_s / 10.0).min(100.0)
}

pub fn cme_severity(intensity: f64) -> SeverityLevel {
    if intensity < 30.0 {
        SeverityLevel::Minor
    } else if intensity < 50.0 {
        SeverityLevel::Moderate
    } else if intensity < 70.0 {
        SeverityLevel::Strong
    } else if intensity < 90.0 {
        SeverityLevel::Severe
    } else {
        SeverityLevel::Extreme
    }
}

pub fn storm_intensity(max_kp: f64) -> f64 {
    max_kp * 10.0
}

/// Storm severity is classified against the raw Kp value while intensity is
/// the x10 scaling. The mismatched units are inherited behavior that story
/// thresholds were tuned against; flagged in DESIGN.md, not silently fixed.
pub fn storm_severity(max_kp: f64) -> SeverityLevel {
    if max_kp < 4.0 {
        SeverityLevel::Minor
    } else if max_kp < 6.0 {
        SeverityLevel::Moderate
    } else if max_kp < 7.0 {
        SeverityLevel::Strong
    } else if max_kp < 8.0 {
        SeverityLevel::Severe
    } else {
        SeverityLevel::Extreme
    }
}

/// NOAA R-scale 1..5 mapped onto the common intensity range.
pub fn blackout_intensity(scale_level: u8) -> f64 {
    f64::from(scale_level.min(5)) * 20.0
}

pub fn blackout_severity(scale_level: u8) -> SeverityLevel {
    match scale_level {
        0 | 1 => SeverityLevel::Minor,
        2 => SeverityLevel::Moderate,
        3 => SeverityLevel::Strong,
        4 => SeverityLevel::Severe,
        _ => SeverityLevel::Extreme,
    }
}

fn push_tags(list: &mut Vec<String>, tags: &[&str]) {
    for tag in tags {
        list.push((*tag).to_string());
    }
}

fn context(
    base_characters: &[&str],
    base_topics: &[&str],
    intensity: f64,
    mid: f64,
    high: f64,
    mid_characters: &[&str],
    mid_topics: &[&str],
    high_characters: &[&str],
    high_topics: &[&str],
    impact: SeverityLevel,
) -> StoryContext {
    let mut characters = Vec::new();
    let mut topics = Vec::new();
    push_tags(&mut characters, base_characters);
    push_tags(&mut topics, base_topics);

    if intensity >= mid {
        push_tags(&mut characters, mid_characters);
        push_tags(&mut topics, mid_topics);
    }
    if intensity >= high {
        push_tags(&mut characters, high_characters);
        push_tags(&mut topics, high_topics);
    }

    let difficulty = if intensity < mid {
        Difficulty::Beginner
    } else if intensity < high {
        Difficulty::Intermediate
    } else {
        Difficulty::Advanced
    };

    StoryContext {
        characters,
        educational_topics: topics,
        difficulty,
        impact_level: impact,
    }
}

fn event_time_or_now(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(parse_event_time).unwrap_or_else(Utc::now)
}

pub fn process_solar_flare(record: &FlareRecord) -> ApiResult<ProcessedWeatherEvent> {
    let class = record
        .class_type
        .as_deref()
        .ok_or_else(|| ApiError::Normalization(format!("flare {} has no class type", record.flr_id)))?;
    let (letter, magnitude) = parse_flare_class(class)
        .ok_or_else(|| ApiError::Normalization(format!("unparseable flare class '{}'", class)))?;

    let intensity = flare_intensity(letter, magnitude);
    let severity = flare_severity(letter, intensity);

    Ok(ProcessedWeatherEvent {
        id: format!("{}-{}", EventType::SolarFlare.id_prefix(), record.flr_id),
        event_type: EventType::SolarFlare,
        event_time: event_time_or_now(record.begin_time.as_deref()),
        intensity,
        severity_level: severity,
        story_context: context(
            &["sunny_the_sun"],
            &["solar_flares", "electromagnetic_radiation"],
            intensity,
            25.0,
            35.0,
            &["astronaut", "satellite_operator"],
            &["space_technology"],
            &["pilot", "radio_operator"],
            &["radio_communication"],
            severity,
        ),
        source_data: RawEventRecord::Flare(record.clone()),
    })
}

pub fn process_cme(record: &CmeRecord) -> ApiResult<ProcessedWeatherEvent> {
    let speed = record.speed().unwrap_or(DEFAULT_CME_SPEED);
    let intensity = cme_intensity(speed);
    let severity = cme_severity(intensity);

    Ok(ProcessedWeatherEvent {
        id: format!("{}-{}", EventType::Cme.id_prefix(), record.activity_id),
        event_type: EventType::Cme,
        event_time: event_time_or_now(record.start_time.as_deref()),
        intensity,
        severity_level: severity,
        story_context: context(
            &["cosmo_the_cme"],
            &["coronal_mass_ejections", "solar_wind"],
            intensity,
            50.0,
            70.0,
            &["astronaut"],
            &["magnetosphere"],
            &["power_grid_operator"],
            &["geomagnetic_induction"],
            severity,
        ),
        source_data: RawEventRecord::Cme(record.clone()),
    })
}

pub fn process_storm(record: &StormRecord) -> ApiResult<ProcessedWeatherEvent> {
    let max_kp = record
        .all_kp_index
        .iter()
        .map(|r| r.kp_index)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_kp.is_finite() {
        return Err(ApiError::Normalization(format!(
            "storm {} has no Kp readings",
            record.gst_id
        )));
    }

    let intensity = storm_intensity(max_kp);
    let severity = storm_severity(max_kp);

    Ok(ProcessedWeatherEvent {
        id: format!("{}-{}", EventType::GeomagneticStorm.id_prefix(), record.gst_id),
        event_type: EventType::GeomagneticStorm,
        event_time: event_time_or_now(record.start_time.as_deref()),
        intensity,
        severity_level: severity,
        story_context: context(
            &["aurora_the_light"],
            &["geomagnetic_storms", "earth_magnetic_field"],
            intensity,
            50.0,
            70.0,
            &["satellite_operator"],
            &["satellite_drag"],
            &["power_grid_operator"],
            &["power_grids"],
            severity,
        ),
        source_data: RawEventRecord::Storm(record.clone()),
    })
}

pub fn process_radio_blackout(record: &RadioBlackoutRecord) -> ApiResult<ProcessedWeatherEvent> {
    let scale = record.scale.as_deref().ok_or_else(|| {
        ApiError::Normalization(format!("radio blackout {} has no scale", record.rbe_id))
    })?;
    let level: u8 = scale
        .trim_start_matches(['R', 'r'])
        .parse()
        .map_err(|_| ApiError::Normalization(format!("unparseable R-scale '{}'", scale)))?;

    let intensity = blackout_intensity(level);
    let severity = blackout_severity(level);

    Ok(ProcessedWeatherEvent {
        id: format!("{}-{}", EventType::RadioBlackout.id_prefix(), record.rbe_id),
        event_type: EventType::RadioBlackout,
        event_time: event_time_or_now(record.begin_time.as_deref()),
        intensity,
        severity_level: severity,
        story_context: context(
            &["radio_ranger"],
            &["radio_blackouts", "ionosphere"],
            intensity,
            40.0,
            80.0,
            &["pilot"],
            &["aviation_communication"],
            &["emergency_responder"],
            &["emergency_broadcasts"],
            severity,
        ),
        source_data: RawEventRecord::RadioBlackout(record.clone()),
    })
}

/// Normalize every record in a bundle. A malformed record is logged and
/// skipped; the batch always completes.
pub fn process_all(data: &CompleteSpaceWeatherData) -> Vec<ProcessedWeatherEvent> {
    let mut events = Vec::new();

    for record in &data.flares {
        match process_solar_flare(record) {
            Ok(event) => events.push(event),
            Err(e) => warn!("skipping flare: {}", e),
        }
    }
    for record in &data.cmes {
        match process_cme(record) {
            Ok(event) => events.push(event),
            Err(e) => warn!("skipping CME: {}", e),
        }
    }
    for record in &data.storms {
        match process_storm(record) {
            Ok(event) => events.push(event),
            Err(e) => warn!("skipping storm: {}", e),
        }
    }
    for record in &data.radio_blackouts {
        match process_radio_blackout(record) {
            Ok(event) => events.push(event),
            Err(e) => warn!("skipping radio blackout: {}", e),
        }
    }

    events
}

pub fn is_significant(event: &ProcessedWeatherEvent) -> bool {
    event.intensity >= SIGNIFICANT_INTENSITY || event.severity_level >= SeverityLevel::Severe
}

/// Intensity plus a recency bonus decaying linearly to zero over 72 hours.
fn significance_score(event: &ProcessedWeatherEvent, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - event.event_time).num_minutes() as f64 / 60.0;
    let recency = 10.0 * (1.0 - age_hours / 72.0).clamp(0.0, 1.0);
    event.intensity + recency
}

/// Highest intensity wins; recency breaks near-ties.
pub fn most_significant(
    events: &[ProcessedWeatherEvent],
    now: DateTime<Utc>,
) -> Option<&ProcessedWeatherEvent> {
    events
        .iter()
        .max_by(|a, b| significance_score(a, now).total_cmp(&significance_score(b, now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn flare(id: &str, class: Option<&str>, begin: Option<&str>) -> FlareRecord {
        FlareRecord {
            flr_id: id.to_string(),
            class_type: class.map(str::to_string),
            begin_time: begin.map(str::to_string),
            peak_time: None,
            source_location: None,
        }
    }

    fn storm(id: &str, kps: &[f64]) -> StormRecord {
        StormRecord {
            gst_id: id.to_string(),
            start_time: None,
            all_kp_index: kps
                .iter()
                .map(|k| crate::domain::KpReading {
                    observed_time: None,
                    kp_index: *k,
                })
                .collect(),
        }
    }

    #[test]
    fn test_flare_scoring_exactness() {
        let cases = [
            ("C1.0", 21.0, SeverityLevel::Moderate),
            ("M5.0", 35.0, SeverityLevel::Severe),
            ("X1.0", 41.0, SeverityLevel::Extreme),
        ];
        for (class, intensity, severity) in cases {
            let (letter, mag) = parse_flare_class(class).unwrap();
            assert_eq!(flare_intensity(letter, mag), intensity, "{}", class);
            assert_eq!(flare_severity(letter, intensity), severity, "{}", class);
        }
    }

    #[test]
    fn test_flare_overflow_not_clamped_below_x() {
        let (letter, mag) = parse_flare_class("M15").unwrap();
        assert_eq!(flare_intensity(letter, mag), 45.0);
    }

    #[test]
    fn test_x_class_magnitude_contribution_capped() {
        let (letter, mag) = parse_flare_class("X99").unwrap();
        assert_eq!(flare_intensity(letter, mag), 100.0);
    }

    #[test]
    fn test_flare_severity_monotone_over_valid_inputs() {
        let mut scored = Vec::new();
        for letter in ['A', 'B', 'C', 'M', 'X'] {
            for tenth in 10..=99 {
                let mag = tenth as f64 / 10.0;
                let intensity = flare_intensity(letter, mag);
                scored.push((intensity, flare_severity(letter, intensity)));
            }
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in scored.windows(2) {
            assert!(
                pair[0].1 <= pair[1].1,
                "severity regressed between intensity {} and {}",
                pair[0].0,
                pair[1].0
            );
        }
    }

    #[test]
    fn test_cme_scoring_boundaries() {
        assert_eq!(cme_intensity(300.0), 30.0);
        assert_eq!(cme_severity(30.0), SeverityLevel::Moderate);
        assert_eq!(cme_intensity(1000.0), 100.0);
        assert_eq!(cme_severity(100.0), SeverityLevel::Extreme);
        assert_eq!(cme_severity(29.9), SeverityLevel::Minor);
    }

    #[test]
    fn test_cme_default_speed() {
        let record = CmeRecord {
            activity_id: "2025-08-20T12:00:00-CME-001".to_string(),
            start_time: None,
            cme_analyses: Vec::new(),
            note: None,
        };
        let event = process_cme(&record).unwrap();
        assert_eq!(event.intensity, 30.0);
        assert_eq!(event.severity_level, SeverityLevel::Moderate);
    }

    #[test]
    fn test_storm_severity_uses_raw_index_not_scaled_intensity() {
        let event = process_storm(&storm("gst-1", &[3.0, 6.5, 5.0])).unwrap();
        assert_eq!(event.intensity, 65.0);
        // Classified from max Kp 6.5, not from intensity 65.
        assert_eq!(event.severity_level, SeverityLevel::Strong);
    }

    #[test]
    fn test_storm_without_readings_fails_normalization() {
        assert!(process_storm(&storm("gst-2", &[])).is_err());
    }

    #[test]
    fn test_radio_blackout_scale_mapping() {
        let record = RadioBlackoutRecord {
            rbe_id: "rbe-1".to_string(),
            scale: Some("R3".to_string()),
            begin_time: None,
        };
        let event = process_radio_blackout(&record).unwrap();
        assert_eq!(event.intensity, 60.0);
        assert_eq!(event.severity_level, SeverityLevel::Strong);
    }

    #[test]
    fn test_idempotent_id_generation() {
        let record = flare("2025-08-20T12:00:00-FLR-001", Some("M2.1"), None);
        let a = process_solar_flare(&record).unwrap();
        let b = process_solar_flare(&record).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "FLR-2025-08-20T12:00:00-FLR-001");
    }

    #[test]
    fn test_m21_end_to_end() {
        let record = flare("flr-e2e", Some("M2.1"), Some("2025-08-20T12:00Z"));
        let event = process_solar_flare(&record).unwrap();

        assert!((event.intensity - 32.1).abs() < 1e-9);
        assert_eq!(event.severity_level, SeverityLevel::Strong);
        let characters = &event.story_context.characters;
        assert!(characters.contains(&"astronaut".to_string()));
        assert!(characters.contains(&"satellite_operator".to_string()));
        assert!(!characters.contains(&"pilot".to_string()));
        assert_eq!(event.story_context.difficulty, Difficulty::Intermediate);
        assert_eq!(event.event_time.to_rfc3339(), "2025-08-20T12:00:00+00:00");
    }

    #[test]
    fn test_batch_survives_malformed_record() {
        let swpc = crate::clients::swpc::SwpcClient::new(
            std::sync::Arc::new(crate::clients::testing::MockTransport::status(500)),
            crate::clients::swpc::SwpcConfig {
                base_url: String::new(),
                cache_ttl: std::time::Duration::from_secs(1),
                synthetic_seed: Some(1),
            },
        );
        let conditions = swpc.synthetic_conditions();
        let data = CompleteSpaceWeatherData {
            flares: vec![
                flare("good", Some("C3.0"), None),
                flare("bad", None, None),
            ],
            cmes: Vec::new(),
            storms: Vec::new(),
            radio_blackouts: Vec::new(),
            shocks: Vec::new(),
            summary: crate::domain::WeatherSummary {
                solar_wind: conditions.solar_wind.clone(),
                geomagnetic_activity: crate::domain::ActivityLevel::Low,
                storm_probability: 0.0,
                flare_activity: crate::domain::ActivityLevel::Low,
                strongest_flare_class: None,
                aurora_visibility: conditions.aurora_estimate,
            },
            conditions,
            fetched_at: Utc::now(),
        };

        let events = process_all(&data);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "FLR-good");
    }

    #[test]
    fn test_most_significant_prefers_intensity_then_recency() {
        let now = Utc::now();
        let mut old_strong = process_solar_flare(&flare("old", Some("M5.0"), None)).unwrap();
        old_strong.event_time = now - Duration::hours(100);
        let mut fresh_equal = process_solar_flare(&flare("fresh", Some("M5.0"), None)).unwrap();
        fresh_equal.event_time = now - Duration::hours(1);
        let mut weak = process_solar_flare(&flare("weak", Some("B2.0"), None)).unwrap();
        weak.event_time = now;

        let events = vec![old_strong, fresh_equal, weak];
        let top = most_significant(&events, now).unwrap();
        assert_eq!(top.id, "FLR-fresh");
    }

    #[test]
    fn test_significance_bar() {
        let strong = process_solar_flare(&flare("a", Some("M2.1"), None)).unwrap();
        assert!(is_significant(&strong)); // 32.1 >= 30

        let quiet = process_solar_flare(&flare("b", Some("B1.0"), None)).unwrap();
        assert!(!is_significant(&quiet));

        let quiet_storm = process_storm(&storm("c", &[2.9])).unwrap();
        assert!(!is_significant(&quiet_storm));
        let severe_storm = process_storm(&storm("d", &[7.5])).unwrap();
        assert!(is_significant(&severe_storm));
    }
}
