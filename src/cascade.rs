//! Resolution of one candidate name through several query formulations.
//!
//! Every formulation is launched at once and all of them are awaited; the
//! winner is picked by priority rank, never by arrival order, so the same
//! batch resolves the same way regardless of network timing.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::model::GeocodeResult;
use crate::places::GeocodingProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
    LocalizedSearch = 1,
    AddressGeocode = 2,
    EnglishSearch = 3,
    BareName = 4,
    BareEnglishName = 5,
}

impl Strategy {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::LocalizedSearch => "localized_search",
            Strategy::AddressGeocode => "address_geocode",
            Strategy::EnglishSearch => "english_search",
            Strategy::BareName => "bare_name",
            Strategy::BareEnglishName => "bare_english_name",
        }
    }

    fn uses_address_geocode(&self) -> bool {
        matches!(self, Strategy::AddressGeocode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub strategy: Strategy,
    pub query: String,
}

/// Builds the query formulations for one candidate, in priority order.
pub fn plan_queries(
    name: &str,
    name_en: Option<&str>,
    destination: &str,
    country: Option<&str>,
) -> Vec<PlannedQuery> {
    let name = name.trim();
    let name_en = name_en.map(str::trim).filter(|value| !value.is_empty());
    let destination = destination.trim();
    let country = country.map(str::trim).filter(|value| !value.is_empty());

    let mut plan = vec![
        PlannedQuery {
            strategy: Strategy::LocalizedSearch,
            query: join_present(&[name, destination, country.unwrap_or("")], " "),
        },
        PlannedQuery {
            strategy: Strategy::AddressGeocode,
            query: join_present(&[name, destination, country.unwrap_or("")], ", "),
        },
    ];

    if let Some(english) = name_en.filter(|english| !english.eq_ignore_ascii_case(name)) {
        plan.push(PlannedQuery {
            strategy: Strategy::EnglishSearch,
            query: join_present(&[english, destination, country.unwrap_or("")], " "),
        });
    }

    plan.push(PlannedQuery {
        strategy: Strategy::BareName,
        query: name.to_string(),
    });

    if let Some(english) = name_en {
        plan.push(PlannedQuery {
            strategy: Strategy::BareEnglishName,
            query: english.to_string(),
        });
    }

    plan.retain(|planned| !planned.query.is_empty());
    plan
}

fn join_present(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}

/// Batch-scoped resolver. Owns the cache, so dropping it at the end of a
/// batch drops every cached hit and miss with it.
pub struct GeocodeCascade {
    provider: Arc<dyn GeocodingProvider>,
    cache: Mutex<HashMap<String, Option<GeocodeResult>>>,
}

impl GeocodeCascade {
    pub fn new(provider: Arc<dyn GeocodingProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub async fn resolve_with_fallback(
        &self,
        name: &str,
        name_en: Option<&str>,
        destination: &str,
        country: Option<&str>,
    ) -> Option<GeocodeResult> {
        let key = cache_key(name, name_en);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(cached) = cached {
            trace!(key = key.as_str(), hit = cached.is_some(), "geocode cache hit");
            return cached;
        }

        let plan = plan_queries(name, name_en, destination, country);
        let attempts = plan.iter().map(|planned| self.run(planned));
        let mut successes: Vec<(Strategy, GeocodeResult)> = join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .collect();
        successes.sort_by_key(|(strategy, _)| strategy.rank());
        let resolved = successes.into_iter().next().map(|(strategy, result)| {
            debug!(
                name,
                strategy = strategy.as_str(),
                lat = result.latitude,
                lng = result.longitude,
                "candidate resolved"
            );
            result
        });

        if resolved.is_none() {
            debug!(name, ?name_en, "no strategy resolved candidate");
        }
        self.cache.lock().insert(key, resolved.clone());
        resolved
    }

    async fn run(&self, planned: &PlannedQuery) -> Option<(Strategy, GeocodeResult)> {
        let outcome = if planned.strategy.uses_address_geocode() {
            self.provider.geocode_address(&planned.query).await
        } else {
            self.provider.search_text(&planned.query).await
        };
        match outcome {
            Ok(result) => result.map(|result| (planned.strategy, result)),
            Err(err) => {
                warn!(
                    ?err,
                    strategy = planned.strategy.as_str(),
                    query = planned.query.as_str(),
                    "geocoding strategy failed"
                );
                None
            }
        }
    }
}

fn cache_key(name: &str, name_en: Option<&str>) -> String {
    format!("{}|{}", name.trim(), name_en.map(str::trim).unwrap_or(""))
}
