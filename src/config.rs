use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_PLACE_CATEGORIES: &[&str] = &[
    "restaurant",
    "cafe",
    "hotel",
    "attraction",
    "shopping",
    "nature",
    "transport",
    "other",
];
const DEFAULT_PLACES_API_BASE: &str = "https://places.googleapis.com";
const DEFAULT_GEOCODING_API_BASE: &str = "https://maps.googleapis.com";
const DEFAULT_ANALYSIS_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.0-flash";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_file_name: String,
    pub google_places_api_key: Option<SecretString>,
    pub places_api_base: String,
    pub geocoding_api_base: String,
    pub places_language: Option<String>,
    pub places_rate_limit_qps: u32,
    pub analysis_api_key: Option<SecretString>,
    pub analysis_api_base: String,
    pub analysis_model: String,
    pub http_timeout_secs: u64,
    pub confidence_threshold: f64,
    pub place_categories: Vec<String>,
    pub max_parallel_analyses: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub database_file_name: String,
    pub places_api_base: String,
    pub geocoding_api_base: String,
    pub places_language: Option<String>,
    pub places_rate_limit_qps: u32,
    pub analysis_api_base: String,
    pub analysis_model: String,
    pub http_timeout_secs: u64,
    pub confidence_threshold: f64,
    pub place_categories: Vec<String>,
    pub max_parallel_analyses: Option<usize>,
    pub has_google_places_key: bool,
    pub has_analysis_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "travel-places.db".to_string()),
            google_places_api_key: parse_secret("GOOGLE_PLACES_API_KEY"),
            places_api_base: parse_url("PLACES_API_BASE", DEFAULT_PLACES_API_BASE),
            geocoding_api_base: parse_url("GEOCODING_API_BASE", DEFAULT_GEOCODING_API_BASE),
            places_language: env::var("PLACES_LANGUAGE")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            places_rate_limit_qps: parse_u32("PLACES_RATE_LIMIT_QPS", 10).max(1),
            analysis_api_key: parse_secret("GEMINI_API_KEY"),
            analysis_api_base: parse_url("ANALYSIS_API_BASE", DEFAULT_ANALYSIS_API_BASE),
            analysis_model: env::var("ANALYSIS_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string()),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 30).max(1),
            confidence_threshold: parse_f64("CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD)
                .clamp(0.0, 1.0),
            place_categories: parse_list("PLACE_CATEGORIES", DEFAULT_PLACE_CATEGORIES),
            max_parallel_analyses: Some(parse_usize("MAX_PARALLEL_ANALYSES", 0))
                .filter(|limit| *limit > 0),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            database_file_name: self.database_file_name.clone(),
            places_api_base: self.places_api_base.clone(),
            geocoding_api_base: self.geocoding_api_base.clone(),
            places_language: self.places_language.clone(),
            places_rate_limit_qps: self.places_rate_limit_qps,
            analysis_api_base: self.analysis_api_base.clone(),
            analysis_model: self.analysis_model.clone(),
            http_timeout_secs: self.http_timeout_secs,
            confidence_threshold: self.confidence_threshold,
            place_categories: self.place_categories.clone(),
            max_parallel_analyses: self.max_parallel_analyses,
            has_google_places_key: self.google_places_api_key.is_some(),
            has_analysis_key: self.analysis_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn parse_url(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    let parsed = env::var(key)
        .map(|v| {
            v.split(',')
                .map(|entry| entry.trim().to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        default.iter().map(|entry| entry.to_string()).collect()
    } else {
        parsed
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
