use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

use crate::error::{Result, VaxError};

/// Canonical manufacturer labels used consistently across all locations.
/// Location mappings must resolve into this set; anything else is a
/// configuration gap that has to be fixed by hand.
pub static CANONICAL_VACCINES: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "Abdala",
        "CanSino",
        "Covaxin",
        "EpiVacCorona",
        "Johnson&Johnson",
        "KoviVac",
        "Medigen",
        "Moderna",
        "Novavax",
        "Oxford/AstraZeneca",
        "Pfizer/BioNTech",
        "QazVac",
        "Sinopharm/Beijing",
        "Sinopharm/Wuhan",
        "Sinovac",
        "Soberana02",
        "Sputnik Light",
        "Sputnik V",
        "ZF2001",
    ]
    .into_iter()
    .collect()
});

/// Products whose regimen confers full vaccination after a single dose.
pub static ONE_DOSE_VACCINES: Lazy<BTreeSet<&'static str>> =
    Lazy::new(|| ["CanSino", "Johnson&Johnson", "Sputnik Light"].into_iter().collect());

/// Resolve raw source tokens into canonical vaccine names.
///
/// Every token must be present in the location's mapping and every mapped
/// value must be canonical. Unknown tokens are collected and reported
/// together; they are never silently dropped, since omitting a manufacturer
/// silently corrupts downstream manufacturer totals.
pub fn resolve(
    raw_names: &[String],
    mapping: &HashMap<String, String>,
    location: &str,
) -> Result<BTreeSet<String>> {
    let mut resolved = BTreeSet::new();
    let mut unknown = Vec::new();
    for raw in raw_names {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        match mapping.get(token) {
            Some(canonical) if CANONICAL_VACCINES.contains(canonical.as_str()) => {
                resolved.insert(canonical.clone());
            }
            // A mapping emitting a non-canonical name is as much of a
            // taxonomy gap as a missing entry.
            Some(canonical) => unknown.push(canonical.clone()),
            None => unknown.push(token.to_string()),
        }
    }
    if !unknown.is_empty() {
        unknown.sort();
        unknown.dedup();
        return Err(VaxError::UnknownVaccine {
            location: location.to_string(),
            tokens: unknown,
        });
    }
    Ok(resolved)
}

/// True iff every resolved vaccine belongs to the one-dose product set.
/// Gates whether `people_fully_vaccinated` may be derived from
/// `people_vaccinated`.
pub fn is_single_dose_only(canonical: &BTreeSet<String>, one_dose: &BTreeSet<String>) -> bool {
    !canonical.is_empty() && canonical.iter().all(|name| one_dose.contains(name))
}

/// The crate's default one-dose product set.
pub fn one_dose_set() -> BTreeSet<String> {
    ONE_DOSE_VACCINES.iter().map(|s| s.to_string()).collect()
}

/// Render a canonical set as the sorted comma-joined form carried on an
/// `Observation`.
pub fn render(canonical: &BTreeSet<String>) -> String {
    canonical.iter().cloned().collect::<Vec<_>>().join(", ")
}
