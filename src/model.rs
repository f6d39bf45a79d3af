use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_PLACE_CATEGORIES};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Photo,
    Text,
}

impl SourceType {
    pub fn as_tag(&self) -> &'static str {
        match self {
            SourceType::Photo => "photo",
            SourceType::Text => "text",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(SourceType::Photo),
            "text" => Ok(SourceType::Text),
            _ => Err(AppError::Config(format!("invalid source type: {value}"))),
        }
    }

    /// Table holding the `(place_id, item_id)` links for this kind of item.
    pub fn link_table(&self) -> &'static str {
        match self {
            SourceType::Photo => "photo_places",
            SourceType::Text => "text_places",
        }
    }

    /// Builds the analysis payload from the stored item columns.
    pub fn payload_from_columns(
        &self,
        image_url: Option<String>,
        mime_type: Option<String>,
        content: Option<String>,
    ) -> AppResult<ItemPayload> {
        match self {
            SourceType::Photo => {
                let url = image_url
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| AppError::Config("photo item has no image reference".into()))?;
                Ok(ItemPayload::Image { url, mime_type })
            }
            SourceType::Text => {
                let content = content
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| AppError::Config("text item has no content".into()))?;
                Ok(ItemPayload::Text { content })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemPayload {
    Image {
        url: String,
        mime_type: Option<String>,
    },
    Text {
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessableItem {
    pub id: i64,
    pub project_id: i64,
    pub source_type: SourceType,
    pub payload: ItemPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processed,
    Failed,
}

impl ItemStatus {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processed => "processed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(ItemStatus::Pending),
            "processed" => Ok(ItemStatus::Processed),
            "failed" => Ok(ItemStatus::Failed),
            _ => Err(AppError::Config(format!("invalid item status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCandidate {
    pub name: String,
    pub name_en: Option<String>,
    pub category: String,
    pub note: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
    pub external_place_id: Option<String>,
    pub maps_url: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub price_level: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExistingPlace {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub external_place_id: Option<String>,
}

/// A place about to be written for the first time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlace {
    pub name: String,
    pub name_en: Option<String>,
    pub category: String,
    pub note: Option<String>,
    pub source_type: SourceType,
    pub geocode: GeocodeResult,
}

impl NewPlace {
    pub fn from_candidate(
        candidate: &ExtractedCandidate,
        geocode: GeocodeResult,
        source_type: SourceType,
    ) -> Self {
        Self {
            name: candidate.name.trim().to_string(),
            name_en: candidate.name_en.clone(),
            category: candidate.category.clone(),
            note: candidate.note.clone(),
            source_type,
            geocode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectInfo {
    pub id: i64,
    pub name: String,
    pub destination: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// The set of categories a candidate may be filed under.
///
/// The last entry doubles as the fallback for anything the analysis
/// service returns outside the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCategories {
    entries: Vec<String>,
}

impl PlaceCategories {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for entry in entries {
            let value = entry.as_ref().trim().to_ascii_lowercase();
            if !value.is_empty() && !normalized.contains(&value) {
                normalized.push(value);
            }
        }
        if normalized.is_empty() {
            return Self::default();
        }
        Self {
            entries: normalized,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn fallback(&self) -> &str {
        self.entries.last().map(String::as_str).unwrap_or("other")
    }

    pub fn normalize(&self, value: &str) -> String {
        let wanted = value.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .find(|entry| **entry == wanted)
            .cloned()
            .unwrap_or_else(|| self.fallback().to_string())
    }
}

impl Default for PlaceCategories {
    fn default() -> Self {
        Self::new(DEFAULT_PLACE_CATEGORIES)
    }
}

/// Human-readable messages attached to items that end up `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMessages {
    pub analysis_failed: String,
    /// Stored row has no image reference or text to analyze.
    pub missing_payload: String,
    pub no_places_recognized: String,
    pub low_confidence: String,
    /// `{name}` is replaced with the candidate name.
    pub location_not_found: String,
    pub no_valid_places: String,
    /// `{error}` is replaced with the repository error.
    pub commit_failed: String,
}

impl ItemMessages {
    pub fn location_not_found_for(&self, name: &str) -> String {
        self.location_not_found.replace("{name}", name)
    }

    pub fn commit_failed_with(&self, error: &str) -> String {
        self.commit_failed.replace("{error}", error)
    }
}

impl Default for ItemMessages {
    fn default() -> Self {
        Self {
            analysis_failed: "Failed to analyze this item".into(),
            missing_payload: "This item has nothing to analyze".into(),
            no_places_recognized: "No places were recognized".into(),
            low_confidence: "No place was recognized with enough confidence".into(),
            location_not_found: "Could not find a location for \"{name}\"".into(),
            no_valid_places: "No valid places found".into(),
            commit_failed: "Failed to save place: {error}".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub confidence_threshold: f64,
    pub categories: PlaceCategories,
    pub max_parallel_analyses: Option<usize>,
    pub messages: ItemMessages,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            categories: PlaceCategories::default(),
            max_parallel_analyses: None,
            messages: ItemMessages::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            categories: PlaceCategories::new(&config.place_categories),
            max_parallel_analyses: config.max_parallel_analyses,
            messages: ItemMessages::default(),
        }
    }
}
