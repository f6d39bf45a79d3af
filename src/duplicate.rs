//! Matching a resolved candidate against the places a project already has.
//!
//! Checks run in a fixed order and the first hit wins: external place id,
//! then case-insensitive name, then proximity. A name hit is accepted even
//! when the coordinates are far apart.

use serde::Serialize;

use crate::geo::haversine_meters;
use crate::model::ExistingPlace;

pub const PROXIMITY_THRESHOLD_METERS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExternalId,
    Name,
    Proximity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub matched: Option<ExistingPlace>,
    pub reason: Option<MatchReason>,
}

impl DuplicateCheck {
    fn none() -> Self {
        Self {
            is_duplicate: false,
            matched: None,
            reason: None,
        }
    }

    fn hit(place: &ExistingPlace, reason: MatchReason) -> Self {
        Self {
            is_duplicate: true,
            matched: Some(place.clone()),
            reason: Some(reason),
        }
    }
}

pub fn find_duplicate(
    existing: &[ExistingPlace],
    name: &str,
    external_place_id: Option<&str>,
    coords: (f64, f64),
) -> DuplicateCheck {
    if let Some(external_id) = external_place_id.filter(|id| !id.is_empty()) {
        if let Some(place) = existing
            .iter()
            .find(|place| place.external_place_id.as_deref() == Some(external_id))
        {
            return DuplicateCheck::hit(place, MatchReason::ExternalId);
        }
    }

    let wanted = name.trim().to_lowercase();
    if !wanted.is_empty() {
        if let Some(place) = existing
            .iter()
            .find(|place| place.name.trim().to_lowercase() == wanted)
        {
            return DuplicateCheck::hit(place, MatchReason::Name);
        }
    }

    let (lat, lng) = coords;
    existing
        .iter()
        .find(|place| {
            haversine_meters(lat, lng, place.latitude, place.longitude)
                < PROXIMITY_THRESHOLD_METERS
        })
        .map(|place| DuplicateCheck::hit(place, MatchReason::Proximity))
        .unwrap_or_else(DuplicateCheck::none)
}
