/// Story request builder. Tries the external generation service model by
/// model, then falls back to the statically authored pool; generation being
/// down is a normal operating mode, not an application error.
use crate::domain::{AgeGroup, EventType, GeneratedStory, StoryRequest, StorySize};
use crate::errors::{ApiError, ApiResult};
use crate::repo::KeyValueStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const STORY_COLLECTION: &str = "stories";

#[async_trait]
pub trait StoryGenerator: Send + Sync {
    /// One attempt against one model; returns the raw assistant text.
    async fn generate(&self, model: &str, system: &str, user: &str) -> ApiResult<String>;
}

/// Chat-completions client for the generation service.
pub struct HttpStoryGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpStoryGenerator {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("stellar-stories/0.1")
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl StoryGenerator for HttpStoryGenerator {
    async fn generate(&self, model: &str, system: &str, user: &str) -> ApiResult<String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ]
        });

        let mut req = self.client.post(&self.api_url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Generation(format!(
                "model {} returned status {}",
                model,
                resp.status()
            )));
        }

        let payload: Value = resp.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Generation("response missing message content".to_string()))
    }
}

/// Structured payload the generation service is asked to produce.
#[derive(Deserialize)]
struct StoryPayload {
    title: String,
    story: String,
    #[serde(rename = "educationalFacts", default)]
    educational_facts: Vec<String>,
}

/// Statically authored story, matched by character/mood/age/size.
pub struct FallbackStory {
    pub character: &'static str,
    pub mood: EventType,
    pub age_group: AgeGroup,
    pub size: StorySize,
    pub title: &'static str,
    pub text: &'static str,
    pub facts: &'static [&'static str],
}

pub static FALLBACK_POOL: &[FallbackStory] = &[
    FallbackStory {
        character: "sunny_the_sun",
        mood: EventType::SolarFlare,
        age_group: AgeGroup::Kids,
        size: StorySize::Short,
        title: "Sunny's Big Sneeze",
        text: "Sunny the Sun felt a tickle deep inside. Achoo! A bright flash of \
               light zoomed toward Earth faster than anything. Down on Earth, the \
               radios crackled and hummed, and scientists smiled. Sunny had sneezed \
               a solar flare!",
        facts: &[
            "Solar flares are bursts of light and energy from the Sun.",
            "The light from a flare reaches Earth in about eight minutes.",
        ],
    },
    FallbackStory {
        character: "sunny_the_sun",
        mood: EventType::SolarFlare,
        age_group: AgeGroup::Kids,
        size: StorySize::Medium,
        title: "Sunny and the Tangled Ropes",
        text: "Sunny the Sun wears invisible magnetic ropes, and sometimes they get \
               tangled. One morning the ropes twisted so tight that SNAP! They let \
               go all at once, flinging a flash of energy into space. The flash \
               raced past Mercury and Venus and washed over Earth's sky-blanket, \
               the ionosphere. Pilots heard their radios whisper and fade. But \
               Earth's blanket held strong, and by lunchtime the radios sang \
               clearly again.",
        facts: &[
            "Flares happen when the Sun's magnetic field lines snap and reconnect.",
            "The ionosphere is a layer of charged air that radio signals bounce off.",
            "Most flares cause only brief radio fading on Earth's day side.",
        ],
    },
    FallbackStory {
        character: "sunny_the_sun",
        mood: EventType::SolarFlare,
        age_group: AgeGroup::Tweens,
        size: StorySize::Short,
        title: "Class X",
        text: "Scientists grade the Sun's flares like homework: A, B, C, M, and the \
               mighty X. Today Sunny turned in an X. Satellite operators sat up \
               straight, pilots switched to backup channels, and aurora watchers \
               packed their cameras. When the Sun does its homework, the whole \
               planet pays attention.",
        facts: &[
            "Flare classes A through X each step up ten times in energy.",
            "X-class flares can disrupt radio and GPS signals.",
        ],
    },
    FallbackStory {
        character: "sunny_the_sun",
        mood: EventType::SolarFlare,
        age_group: AgeGroup::Teens,
        size: StorySize::Medium,
        title: "Eight Minutes Warning",
        text: "The flare left the Sun at the speed of light, which meant nobody on \
               Earth would know for eight minutes. In a control room in Boulder, a \
               forecaster watched the X-ray trace climb and called it: M-class, \
               maybe bigger. Airlines rerouted their polar flights. A satellite \
               team safed their instruments. The flare arrived exactly on \
               schedule, rattled the ionosphere, and was gone. Space weather \
               forecasting is a race you start after the starting gun.",
        facts: &[
            "X-rays from a flare arrive before any particles do.",
            "Polar flight routes are most affected by radio blackouts.",
            "Space weather forecasters monitor the Sun around the clock.",
        ],
    },
    FallbackStory {
        character: "cosmo_the_cme",
        mood: EventType::Cme,
        age_group: AgeGroup::Kids,
        size: StorySize::Short,
        title: "Cosmo the Cloud Goes Traveling",
        text: "Cosmo was a giant cloud of sun-stuff, bigger than a thousand Earths. \
               One day the Sun gave Cosmo a push, and off he flew! He traveled for \
               two whole days across empty space. When he finally bumped into \
               Earth's magnetic bubble, the night sky lit up green and purple. \
               Everyone below said: ooooh!",
        facts: &[
            "A CME is a huge cloud of particles blown off the Sun.",
            "CMEs take one to three days to reach Earth.",
        ],
    },
    FallbackStory {
        character: "cosmo_the_cme",
        mood: EventType::Cme,
        age_group: AgeGroup::Tweens,
        size: StorySize::Medium,
        title: "The Billion-Ton Traveler",
        text: "Cosmo weighed a billion tons and still flew faster than any rocket. \
               Behind him the Sun kept spinning; ahead, a small blue dot grew \
               bigger every hour. Satellites saw him coming and whispered warnings \
               down to Earth. Power companies checked their grids. Aurora hunters \
               drove north. When Cosmo finally arrived, he squeezed Earth's \
               magnetic field like a stress ball, and the sky answered with \
               curtains of light.",
        facts: &[
            "CMEs can carry over a billion tons of solar material.",
            "Fast CMEs travel at more than 1000 kilometers per second.",
            "Earth's magnetosphere shields us from the particle storm.",
        ],
    },
    FallbackStory {
        character: "aurora_the_light",
        mood: EventType::GeomagneticStorm,
        age_group: AgeGroup::Kids,
        size: StorySize::Short,
        title: "Aurora Paints the Sky",
        text: "Aurora had a paintbrush made of wind from the Sun. On quiet nights \
               she stayed near the North Pole, painting soft green ribbons. But \
               when a storm came, she danced south, splashing pink and purple over \
               farms and cities that had never seen her before. Children pressed \
               their noses to cold windows and watched her paint.",
        facts: &[
            "Auroras happen when solar particles hit gases in our atmosphere.",
            "Big geomagnetic storms push auroras far south of the poles.",
        ],
    },
    FallbackStory {
        character: "aurora_the_light",
        mood: EventType::GeomagneticStorm,
        age_group: AgeGroup::Teens,
        size: StorySize::Long,
        title: "Kp Nine",
        text: "The planetary index runs from zero to nine, and tonight it hit the \
               top of the scale. Aurora watched the storm pour energy into the \
               upper atmosphere: oxygen glowing green at a hundred kilometers, \
               red higher up, nitrogen fringing the curtains with purple. Below \
               her, grid operators trimmed load as the ground itself grew \
               electric currents. Navigators double-checked GPS fixes that \
               wandered by meters. And across three continents, people who had \
               never seen the lights stood in parking lots, looking up. A Kp nine \
               storm is trouble and wonder in the same package - which is why \
               scientists never sleep through one.",
        facts: &[
            "The Kp index measures global geomagnetic disturbance from 0 to 9.",
            "Strong storms induce currents in power lines and pipelines.",
            "Auroral colors come from oxygen and nitrogen at different altitudes.",
            "Storms can degrade GPS accuracy by several meters.",
        ],
    },
    FallbackStory {
        character: "radio_ranger",
        mood: EventType::RadioBlackout,
        age_group: AgeGroup::Tweens,
        size: StorySize::Short,
        title: "The Day the Radios Whispered",
        text: "Radio Ranger's job was carrying voices around the curve of the \
               Earth, bouncing them off the ionosphere like a trampoline. Then a \
               flare soaked the trampoline with energy and the bounces turned to \
               thuds. For an hour, ships and planes on the sunlit side spoke into \
               static. Ranger waited, patched what he could through satellites, \
               and when the ionosphere calmed, the voices came back.",
        facts: &[
            "Radio blackouts affect the sunlit side of Earth.",
            "Shortwave radio bounces off the ionosphere to travel far.",
        ],
    },
    FallbackStory {
        character: "astronaut_alex",
        mood: EventType::SolarFlare,
        age_group: AgeGroup::Kids,
        size: StorySize::Short,
        title: "Alex Takes Shelter",
        text: "Aboard the station, a light blinked: solar flare! Astronaut Alex \
               floated calmly to the shielded module, bringing a sandwich and a \
               book. Outside, invisible energy washed past the station's thick \
               walls. An hour later the all-clear chimed. Space is an adventure, \
               Alex wrote in the logbook, and sometimes an adventure is just a \
               quiet hour with a good book.",
        facts: &[
            "Astronauts shelter in shielded parts of the station during storms.",
            "Mission control watches space weather for the crew around the clock.",
        ],
    },
];

/// Ordered match relaxation: exact, then drop size, then drop mood, then drop
/// age group. A request whose character has no pool entries matches nothing.
pub fn select_fallback(
    character: &str,
    mood: Option<EventType>,
    age_group: AgeGroup,
    size: StorySize,
) -> Option<&'static FallbackStory> {
    let mood_matches = |s: &FallbackStory| mood.map_or(true, |m| s.mood == m);

    let predicates: [Box<dyn Fn(&FallbackStory) -> bool + '_>; 4] = [
        Box::new(|s| {
            s.character == character && mood_matches(s) && s.age_group == age_group && s.size == size
        }),
        Box::new(|s| s.character == character && mood_matches(s) && s.age_group == age_group),
        Box::new(|s| s.character == character && s.age_group == age_group),
        Box::new(|s| s.character == character),
    ];

    predicates
        .iter()
        .find_map(|pred| FALLBACK_POOL.iter().find(|s| pred(s)))
}

pub struct StoryService {
    generator: Arc<dyn StoryGenerator>,
    models: Vec<String>,
    store: Arc<dyn KeyValueStore>,
    history_max: usize,
}

impl StoryService {
    pub fn new(
        generator: Arc<dyn StoryGenerator>,
        models: Vec<String>,
        store: Arc<dyn KeyValueStore>,
        history_max: usize,
    ) -> Self {
        Self {
            generator,
            models,
            store,
            history_max,
        }
    }

    /// Build a story for the request. Returns None only when generation is
    /// unavailable and the character has no fallback pool entries.
    pub async fn request_story(&self, request: &StoryRequest) -> Option<GeneratedStory> {
        let mood = request.event_context.as_ref().map(|e| e.event_type);
        let source_event_id = request.event_context.as_ref().map(|e| e.id.clone());

        let system = build_system_prompt(request.age_group);
        let user = build_user_prompt(request);

        for model in &self.models {
            match self.generator.generate(model, &system, &user).await {
                Ok(text) => {
                    let story = story_from_text(&text, request, source_event_id.clone());
                    self.persist(&story).await;
                    return Some(story);
                }
                Err(e) => warn!("generation with {} failed: {}", model, e),
            }
        }

        info!("all generation models exhausted, using fallback pool");
        let fallback =
            select_fallback(&request.character, mood, request.age_group, request.story_size)?;

        let story = GeneratedStory {
            id: Uuid::new_v4(),
            title: fallback.title.to_string(),
            story: fallback.text.to_string(),
            character: request.character.clone(),
            age_group: request.age_group,
            educational_facts: fallback.facts.iter().map(|f| f.to_string()).collect(),
            source_event_id,
            generated_at: Utc::now(),
            is_fallback: true,
        };
        self.persist(&story).await;
        Some(story)
    }

    /// Recently generated stories, oldest first. Empty when persistence is
    /// unavailable.
    pub async fn recent_stories(&self) -> Vec<Value> {
        match self.store.list(STORY_COLLECTION).await {
            Ok(stories) => stories,
            Err(e) => {
                warn!("failed to read story history: {}", e);
                Vec::new()
            }
        }
    }

    async fn persist(&self, story: &GeneratedStory) {
        let Ok(value) = serde_json::to_value(story) else {
            return;
        };
        if let Err(e) = self.store.append(STORY_COLLECTION, value, self.history_max).await {
            warn!("failed to persist story {}: {}", story.id, e);
        }
    }
}

fn build_system_prompt(age_group: AgeGroup) -> String {
    let audience = match age_group {
        AgeGroup::Kids => "children aged 5-8; use simple words and short sentences",
        AgeGroup::Tweens => "children aged 9-12; playful but start introducing real terms",
        AgeGroup::Teens => "teenagers aged 13-16; accurate science, engaging voice",
    };
    format!(
        "You are a space-weather storyteller writing for {}. Respond with JSON: \
         {{\"title\": string, \"story\": string, \"educationalFacts\": [string]}}.",
        audience
    )
}

fn build_user_prompt(request: &StoryRequest) -> String {
    let length = match request.story_size {
        StorySize::Short => "about 100 words",
        StorySize::Medium => "about 250 words",
        StorySize::Long => "about 500 words",
    };
    let mut prompt = format!(
        "Write a {} story featuring the character '{}'.",
        length, request.character
    );
    if let Some(event) = &request.event_context {
        prompt.push_str(&format!(
            " Base it on a real {:?} event with severity {:?}, touching on: {}.",
            event.event_type,
            event.severity_level,
            event.story_context.educational_topics.join(", ")
        ));
    }
    prompt
}

/// Parse the generation response: structured JSON first (with or without code
/// fences), freeform text as a last resort.
fn story_from_text(
    text: &str,
    request: &StoryRequest,
    source_event_id: Option<String>,
) -> GeneratedStory {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let (title, story, facts) = match serde_json::from_str::<StoryPayload>(trimmed) {
        Ok(payload) => (payload.title, payload.story, payload.educational_facts),
        Err(_) => {
            let mut lines = trimmed.lines().filter(|l| !l.trim().is_empty());
            let title = lines
                .next()
                .map(|l| l.trim_start_matches('#').trim().to_string())
                .unwrap_or_else(|| format!("A story about {}", request.character));
            let body: String = lines.collect::<Vec<_>>().join("\n");
            let facts = request
                .event_context
                .as_ref()
                .map(|e| {
                    e.story_context
                        .educational_topics
                        .iter()
                        .map(|t| t.replace('_', " "))
                        .collect()
                })
                .unwrap_or_default();
            (title, if body.is_empty() { trimmed.to_string() } else { body }, facts)
        }
    };

    GeneratedStory {
        id: Uuid::new_v4(),
        title,
        story,
        character: request.character.clone(),
        age_group: request.age_group,
        educational_facts: facts,
        source_event_id,
        generated_at: Utc::now(),
        is_fallback: false,
    }
}
