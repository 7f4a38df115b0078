//! AI station guides and mood search over an OpenAI-compatible chat API.
//!
//! Every call resolves to a [`Suggestion`]: the feature is optional, so a
//! missing key or an unreachable endpoint is an expected outcome rather
//! than an error.

use std::time::Duration;

use chrono::Timelike;
use orbital_proto::config::AiConfig;
use orbital_proto::geo::approximate_local_time;
use orbital_proto::protocol::Station;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Suggestion<T> {
    Ready(T),
    /// Disabled, no key, or the endpoint could not be reached.
    Unavailable,
    /// The model answered with something that is not the expected JSON.
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI suggestions are not configured")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Empty completion")]
    EmptyCompletion,

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl<T> From<Result<T, AiError>> for Suggestion<T> {
    fn from(result: Result<T, AiError>) -> Self {
        match result {
            Ok(value) => Suggestion::Ready(value),
            Err(AiError::NotConfigured) => Suggestion::Unavailable,
            Err(e @ AiError::Http(_)) => {
                warn!("ai: {}", e);
                Suggestion::Unavailable
            }
            Err(e) => {
                warn!("ai: {}", e);
                Suggestion::Malformed(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    fn instruction(self) -> &'static str {
        match self {
            Language::En => "Please respond in English.",
            Language::Zh => "Please respond in Chinese (Simplified).",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationGuide {
    pub summary: String,
    #[serde(rename = "locationInfo")]
    pub location_info: String,
    pub mood: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodQuery {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

impl MoodQuery {
    /// Models sometimes spell "no location" as a string.
    fn normalized(mut self) -> Self {
        let absent = |v: &Option<String>| {
            v.as_deref()
                .map(|s| s.trim().is_empty() || s.trim().eq_ignore_ascii_case("null"))
                .unwrap_or(true)
        };
        if absent(&self.location) {
            self.location = None;
        }
        if absent(&self.genre) {
            self.genre = None;
        }
        self.keywords.retain(|k| !k.trim().is_empty());
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl AiClient {
    /// The API key is read from the environment variable named in `config`.
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        let api_key = if config.enabled {
            std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
        } else {
            None
        };
        if config.enabled && api_key.is_none() {
            warn!("ai: {} not set, suggestions disabled", config.api_key_env);
        }
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn station_guide(&self, station: &Station, language: Language) -> Suggestion<StationGuide> {
        let hour = chrono::Local::now().hour();
        let time_of_day = if hour > 6 && hour < 18 { "Daytime" } else { "Nighttime" };
        let region = if station.state.is_empty() {
            &station.country
        } else {
            &station.state
        };
        let station_clock = station
            .geo_long
            .map(|lng| approximate_local_time(lng, chrono::Utc::now()).format("%H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let prompt = format!(
            r#"You are an intelligent radio guide for "Orbital Radio".
Analyze this radio station and location to provide a brief, engaging summary.
Context: It is currently {time_of_day} at the user's location and about {station_clock} at the station.
{lang}

Station Name: {name}
Tags/Genre: {tags}
Country: {country}
State/Region: {state}
Language: {language}

Please provide a JSON response with the following fields (no markdown formatting, just raw JSON):
{{
  "summary": "A 1-sentence catchy description of what this station likely plays based on its name and tags, with a guess about what might be playing now given the time of day.",
  "locationInfo": "A 1-sentence cool fact about the location ({region}) that provides context.",
  "mood": "A 1-2 word mood description (e.g. 'Energetic', 'Chill', 'News-heavy').",
  "topics": ["Topic 1", "Topic 2", "Topic 3"]
}}

Keep it concise and cyber-punk/tech style if possible."#,
            lang = language.instruction(),
            name = station.name,
            tags = station.tags,
            country = station.country,
            state = station.state,
            language = station.language,
        );

        let result = async {
            let text = self
                .chat("You are a helpful assistant that responds in JSON format.", &prompt)
                .await?;
            parse_payload::<StationGuide>(&text)
        }
        .await;
        result.into()
    }

    pub async fn analyze_mood(&self, input: &str, language: Language) -> Suggestion<MoodQuery> {
        let prompt = format!(
            r#"User Input: "{input}"

Analyze the user's request for radio music/content.
Extract key search terms (genres, tags) and any specific location mentioned.
Translate the intent into standard radio tags (e.g. "coding" -> "lofi, ambient, electronic").
{lang}

Return JSON only:
{{
  "keywords": ["tag1", "tag2", "tag3"],
  "location": "Country or City name if mentioned, else null",
  "genre": "primary genre if applicable"
}}"#,
            lang = language.instruction(),
        );

        let result = async {
            let text = self
                .chat("You are a JSON generator. No markdown.", &prompt)
                .await?;
            parse_payload::<MoodQuery>(&text).map(MoodQuery::normalized)
        }
        .await;
        result.into()
    }

    async fn chat(&self, system: &str, prompt: &str) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::NotConfigured)?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        debug!("ai: chat request to {}", self.base_url);
        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyCompletion)
    }
}

/// Parse a model reply, tolerating markdown code fences around the JSON.
pub fn parse_payload<T: DeserializeOwned>(text: &str) -> Result<T, AiError> {
    let cleaned = text.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim()).map_err(|e| AiError::Malformed(e.to_string()))
}

/// Pick the station that best fits a mood query.
///
/// Scoring: +2 per keyword found in the tags, +3 when the location matches
/// the country, +0.5 for stations with more than 100 clicks.  Ties go to
/// the earlier station; `None` unless the best score is positive.
pub fn best_match<'a>(stations: &'a [Station], query: &MoodQuery) -> Option<&'a Station> {
    let keywords: Vec<String> = query.keywords.iter().map(|k| k.to_lowercase()).collect();
    let location = query.location.as_deref().map(str::to_lowercase);

    let mut best: Option<(f64, &Station)> = None;
    for station in stations {
        let tags = station.tags.to_lowercase();
        let country = station.country.to_lowercase();

        let mut score = 2.0 * keywords.iter().filter(|k| tags.contains(k.as_str())).count() as f64;
        if location.as_deref().is_some_and(|l| country.contains(l)) {
            score += 3.0;
        }
        if station.clickcount > 100 {
            score += 0.5;
        }

        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, station));
        }
    }

    best.filter(|(score, _)| *score > 0.0).map(|(_, station)| station)
}
