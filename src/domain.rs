use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cumulative vaccination counts for one location on one date.
///
/// `None` means the source did not report the field. Unknown is never
/// collapsed to zero; a zero is a reported fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub location: String,
    pub date: NaiveDate,
    pub total_vaccinations: Option<u64>,
    pub people_vaccinated: Option<u64>,
    pub people_fully_vaccinated: Option<u64>,
    pub total_boosters: Option<u64>,
    /// Sorted, de-duplicated, comma-joined canonical vaccine names.
    pub vaccine: String,
    pub source_url: String,
}

impl Observation {
    /// Cumulative fields paired with their names, in dose order.
    pub fn cumulative_fields(&self) -> [(&'static str, Option<u64>); 4] {
        [
            ("total_vaccinations", self.total_vaccinations),
            ("people_vaccinated", self.people_vaccinated),
            ("people_fully_vaccinated", self.people_fully_vaccinated),
            ("total_boosters", self.total_boosters),
        ]
    }

    /// True when at least one cumulative metric is reported.
    pub fn has_any_metric(&self) -> bool {
        self.cumulative_fields().iter().any(|(_, v)| v.is_some())
    }

    pub fn vaccine_names(&self) -> Vec<&str> {
        self.vaccine
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Cumulative doses attributable to one vaccine in one location on one date.
///
/// Partial reporting is allowed: the sum over vaccines for a (location, date)
/// may fall short of the all-manufacturer total, but must never exceed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerRecord {
    pub location: String,
    pub date: NaiveDate,
    pub vaccine: String,
    pub total_vaccinations: u64,
}

/// Sidecar record accompanying each manufacturer export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerMetadata {
    pub location: String,
    pub vaccine_source_name: String,
    pub source_url: String,
}
