use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{ExtractedCandidate, ItemPayload, PlaceCategories};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub places: Vec<ExtractedCandidate>,
    pub raw_text: String,
}

/// Turns one item's payload into candidate place mentions.
///
/// "Nothing found" is an empty `places` list. `Err` means the service could
/// not be reached or answered with something unparseable.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(
        &self,
        payload: &ItemPayload,
        destination: &str,
        country: Option<&str>,
    ) -> AppResult<AnalysisOutput>;
}

pub fn service_from_config(
    config: &AppConfig,
    categories: PlaceCategories,
) -> AppResult<Arc<dyn AnalysisService>> {
    let key = config
        .analysis_api_key
        .clone()
        .ok_or_else(|| AppError::Config("GEMINI_API_KEY is not configured".into()))?;
    Ok(Arc::new(GeminiAnalysisClient::new(
        key,
        &config.analysis_api_base,
        &config.analysis_model,
        categories,
        Duration::from_secs(config.http_timeout_secs),
    )?))
}

pub struct GeminiAnalysisClient {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    model: String,
    categories: PlaceCategories,
}

impl GeminiAnalysisClient {
    pub fn new(
        api_key: SecretString,
        api_base: &str,
        model: &str,
        categories: PlaceCategories,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("travel-place-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            categories,
        })
    }

    async fn load_image(&self, url: &str, mime_type: Option<&str>) -> AppResult<(String, Vec<u8>)> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self.http.get(url).send().await?.error_for_status()?;
            let header_mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
            let bytes = response.bytes().await?.to_vec();
            let mime = mime_type
                .map(str::to_string)
                .or(header_mime)
                .unwrap_or_else(|| guess_image_mime(url).to_string());
            return Ok((mime, bytes));
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_image_mime(path).to_string());
        Ok((mime, bytes))
    }
}

#[async_trait]
impl AnalysisService for GeminiAnalysisClient {
    async fn analyze(
        &self,
        payload: &ItemPayload,
        destination: &str,
        country: Option<&str>,
    ) -> AppResult<AnalysisOutput> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            candidates: Vec<ResponseCandidate>,
        }

        #[derive(Deserialize)]
        struct ResponseCandidate {
            content: Option<ResponseContent>,
        }

        #[derive(Deserialize)]
        struct ResponseContent {
            #[serde(default)]
            parts: Vec<ResponsePart>,
        }

        #[derive(Deserialize)]
        struct ResponsePart {
            text: Option<String>,
        }

        let prompt = build_prompt(payload, destination, country, &self.categories);
        let mut parts = vec![json!({ "text": prompt })];
        if let ItemPayload::Image { url, mime_type } = payload {
            let (mime, bytes) = self.load_image(url, mime_type.as_deref()).await?;
            trace!(url = url.as_str(), bytes = bytes.len(), "attaching image to analysis request");
            parts.push(json!({
                "inline_data": { "mime_type": mime, "data": STANDARD.encode(&bytes) }
            }));
        }

        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let raw_text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let places = parse_candidates(&raw_text, &self.categories)?;
        debug!(model = self.model.as_str(), found = places.len(), "analysis completed");
        Ok(AnalysisOutput { places, raw_text })
    }
}

pub fn build_prompt(
    payload: &ItemPayload,
    destination: &str,
    country: Option<&str>,
    categories: &PlaceCategories,
) -> String {
    let region = match country.filter(|value| !value.trim().is_empty()) {
        Some(country) => format!("{destination}, {country}"),
        None => destination.to_string(),
    };
    let source = match payload {
        ItemPayload::Image { .. } => {
            "Identify every specific place (shop, restaurant, sight, hotel, station) visible or named in the attached photo."
                .to_string()
        }
        ItemPayload::Text { content } => format!(
            "Identify every specific place (shop, restaurant, sight, hotel, station) mentioned in the following note:\n\"\"\"\n{content}\n\"\"\""
        ),
    };
    format!(
        "You are helping plan a trip to {region}.\n{source}\n\
         Respond with JSON only, shaped as {{\"places\":[{{\"name\":string,\"name_en\":string|null,\"category\":string,\"note\":string|null,\"confidence\":number}}]}}.\n\
         Use the local name for \"name\" and its English name for \"name_en\" when it differs.\n\
         \"category\" must be one of: {}.\n\
         \"confidence\" is between 0 and 1. Return {{\"places\":[]}} when nothing is recognizable.",
        categories.entries().join(", ")
    )
}

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    places: Vec<RawCandidate>,
}

#[derive(Deserialize)]
struct RawCandidate {
    name: Option<String>,
    #[serde(alias = "nameEn")]
    name_en: Option<String>,
    category: Option<String>,
    note: Option<String>,
    confidence: Option<f64>,
}

/// Parses the service's JSON answer, tolerating markdown code fences and a
/// bare top-level array.
///
/// A candidate without a finite `confidence` scores 0.0, so it falls below
/// any positive threshold.
pub fn parse_candidates(
    raw_text: &str,
    categories: &PlaceCategories,
) -> AppResult<Vec<ExtractedCandidate>> {
    let body = strip_code_fence(raw_text);
    if body.is_empty() {
        return Err(AppError::Analysis("empty analysis response".into()));
    }

    let raw = if body.starts_with('[') {
        let places: Vec<RawCandidate> = serde_json::from_str(body)
            .map_err(|err| AppError::Analysis(format!("unparseable analysis response: {err}")))?;
        RawAnalysis { places }
    } else {
        serde_json::from_str::<RawAnalysis>(body)
            .map_err(|err| AppError::Analysis(format!("unparseable analysis response: {err}")))?
    };

    Ok(raw
        .places
        .into_iter()
        .filter_map(|candidate| {
            let name = candidate.name?.trim().to_string();
            if name.is_empty() {
                return None;
            }
            let name_en = candidate
                .name_en
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
            let confidence = match candidate.confidence.filter(|value| value.is_finite()) {
                Some(value) => value.clamp(0.0, 1.0),
                None => {
                    debug!(name = name.as_str(), "candidate has no usable confidence; scoring 0");
                    0.0
                }
            };
            Some(ExtractedCandidate {
                name,
                name_en,
                category: categories.normalize(candidate.category.as_deref().unwrap_or("")),
                note: candidate
                    .note
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty()),
                confidence,
            })
        })
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn guess_image_mime(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}
