use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VaxError};
use crate::sources::ObservationInput;
use crate::taxonomy;

/// Reporting channel for rows that carry primary, first-party numbers.
/// Rows on other channels re-publish externally sourced figures and are
/// excluded to prevent circular ingestion.
pub const PRIMARY_CHANNEL: &str = "REPORTING";

/// One row of an aggregate feed reporting many locations in a single pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRow {
    pub location: String,
    pub date: NaiveDate,
    pub data_source: String,
    pub total_vaccinations: Option<f64>,
    pub people_vaccinated: Option<f64>,
    pub people_fully_vaccinated: Option<f64>,
    pub vaccines_used: Option<String>,
}

/// Reconciliation tables for one aggregate feed; all of it is data loaded
/// from configuration, consulted by the one generic algorithm.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub source_url: String,
    /// Sanity ceiling on the row count of one pull; exceeding it means the
    /// feed shape changed upstream.
    pub max_rows: usize,
    /// Feed-specific location spellings -> canonical location names.
    pub aliases: HashMap<String, String>,
    /// Locations we publish; canonicalized rows outside this set are
    /// dropped silently.
    pub locations: BTreeSet<String>,
    /// Raw vaccine tokens -> canonical names for this feed.
    pub vaccine_mapping: HashMap<String, String>,
    /// Vaccines known to be in use that the feed has not yet listed,
    /// per location.
    pub manual_overrides: HashMap<String, Vec<String>>,
    /// One-dose product set used for the single-dose classification.
    pub one_dose: BTreeSet<String>,
}

/// A surviving per-location observation, ready for the field validator.
#[derive(Debug, Clone)]
pub struct ReconciledObservation {
    pub input: ObservationInput,
    pub vaccines: BTreeSet<String>,
    pub single_dose_only: bool,
}

/// Apply consistency masks and canonicalization across an aggregate feed,
/// producing at most one observation per in-scope location.
pub fn reconcile(
    rows: Vec<FeedRow>,
    cfg: &ReconcileConfig,
) -> Result<Vec<ReconciledObservation>> {
    check_shape(&rows, cfg)?;

    let mut out = Vec::new();
    for row in rows {
        // Canonicalize the location first; everything downstream keys on it.
        let location = cfg
            .aliases
            .get(&row.location)
            .cloned()
            .unwrap_or_else(|| row.location.clone());
        if !cfg.locations.contains(&location) {
            // The one permitted silent filter: entities we never publish.
            debug!(location = %location, "dropping out-of-scope feed row");
            continue;
        }

        if row.data_source != PRIMARY_CHANNEL {
            debug!(location = %location, channel = %row.data_source, "dropping non-primary feed row");
            continue;
        }

        if !passes_dose_masks(&row) {
            warn!(
                location = %location,
                date = %row.date,
                total = ?row.total_vaccinations,
                people = ?row.people_vaccinated,
                fully = ?row.people_fully_vaccinated,
                "dropping feed row failing dose-ordering masks"
            );
            continue;
        }

        let raw_tokens: Vec<String> = row
            .vaccines_used
            .as_deref()
            .ok_or_else(|| {
                VaxError::MissingField(format!("vaccines_used for {location} on {}", row.date))
            })?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let mut vaccines = taxonomy::resolve(&raw_tokens, &cfg.vaccine_mapping, &location)?;

        // Union manual overrides before the one-dose classification so a
        // known-used one-dose product cannot be misread as absent.
        if let Some(extra) = cfg.manual_overrides.get(&location) {
            vaccines.extend(extra.iter().cloned());
        }
        let single_dose_only = taxonomy::is_single_dose_only(&vaccines, &cfg.one_dose);

        let total_vaccinations = cast_count(row.total_vaccinations);
        let people_vaccinated = cast_count(row.people_vaccinated);
        let people_fully_vaccinated = cast_count(row.people_fully_vaccinated);
        if total_vaccinations.is_none()
            && people_vaccinated.is_none()
            && people_fully_vaccinated.is_none()
        {
            debug!(location = %location, "dropping feed row with no reported metrics");
            continue;
        }

        out.push(ReconciledObservation {
            input: ObservationInput {
                location,
                date: row.date,
                total_vaccinations,
                people_vaccinated,
                people_fully_vaccinated,
                total_boosters: None,
                vaccines: raw_tokens,
                source_url: cfg.source_url.clone(),
                people_vaccinated_per_hundred: None,
                people_fully_vaccinated_per_hundred: None,
            },
            vaccines,
            single_dose_only,
        });
    }

    out.sort_by(|a, b| a.input.location.cmp(&b.input.location));
    Ok(out)
}

/// Whole-batch shape checks; a failure rejects every row, because a shape
/// change upstream invalidates column assumptions for all of them.
fn check_shape(rows: &[FeedRow], cfg: &ReconcileConfig) -> Result<()> {
    if rows.len() > cfg.max_rows {
        return Err(VaxError::SourceShape(format!(
            "feed returned {} rows, above the ceiling of {}; it may contain updates from several dates",
            rows.len(),
            cfg.max_rows
        )));
    }
    let mut dates_by_location: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
    for row in rows {
        dates_by_location
            .entry(row.location.as_str())
            .or_default()
            .insert(row.date);
    }
    if let Some((location, dates)) = dates_by_location.iter().find(|(_, dates)| dates.len() > 1) {
        return Err(VaxError::SourceShape(format!(
            "location {location} reports {} dates in one pull",
            dates.len()
        )));
    }
    Ok(())
}

/// The three pairwise dose-ordering masks: total >= first dose,
/// total >= fully vaccinated, first dose >= fully vaccinated. Each mask is
/// also true when either side is unknown; a row failing any mask is
/// unreliable for that date and dropped.
fn passes_dose_masks(row: &FeedRow) -> bool {
    mask_ge(row.total_vaccinations, row.people_vaccinated)
        && mask_ge(row.total_vaccinations, row.people_fully_vaccinated)
        && mask_ge(row.people_vaccinated, row.people_fully_vaccinated)
}

fn mask_ge(upper: Option<f64>, lower: Option<f64>) -> bool {
    match (upper, lower) {
        (Some(upper), Some(lower)) => upper >= lower,
        _ => true,
    }
}

/// Feeds report counts as floats or blanks; cast into the nullable-integer
/// domain the rest of the core works in.
fn cast_count(value: Option<f64>) -> Option<u64> {
    value.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()
    }

    fn row(location: &str) -> FeedRow {
        FeedRow {
            location: location.to_string(),
            date: date(),
            data_source: PRIMARY_CHANNEL.to_string(),
            total_vaccinations: Some(1000.0),
            people_vaccinated: Some(600.0),
            people_fully_vaccinated: Some(400.0),
            vaccines_used: Some("PFIZER".to_string()),
        }
    }

    fn cfg() -> ReconcileConfig {
        ReconcileConfig {
            source_url: "https://aggregator.example.org/".to_string(),
            max_rows: 300,
            aliases: HashMap::from([("Testland (rep.)".to_string(), "Testland".to_string())]),
            locations: ["Testland".to_string(), "Othershire".to_string()].into(),
            vaccine_mapping: HashMap::from([
                ("PFIZER".to_string(), "Pfizer/BioNTech".to_string()),
                ("JANSSEN".to_string(), "Johnson&Johnson".to_string()),
            ]),
            manual_overrides: HashMap::new(),
            one_dose: taxonomy::one_dose_set(),
        }
    }

    #[test]
    fn reconcile_canonicalizes_aliases() {
        let out = reconcile(vec![row("Testland (rep.)")], &cfg()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].input.location, "Testland");
    }

    #[test]
    fn reconcile_silently_drops_out_of_scope_locations() {
        let out = reconcile(vec![row("Atlantis")], &cfg()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn reconcile_drops_non_primary_channel() {
        let mut secondary = row("Testland");
        secondary.data_source = "OWID".to_string();
        let out = reconcile(vec![secondary], &cfg()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn reconcile_drops_row_failing_any_mask() {
        let mut bad = row("Testland");
        bad.total_vaccinations = Some(50.0);
        bad.people_vaccinated = Some(80.0);
        bad.people_fully_vaccinated = None; // the other two masks pass
        let out = reconcile(vec![bad], &cfg()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn masks_tolerate_unknown_sides() {
        let mut sparse = row("Testland");
        sparse.total_vaccinations = None;
        sparse.people_vaccinated = Some(600.0);
        sparse.people_fully_vaccinated = Some(400.0);
        let out = reconcile(vec![sparse], &cfg()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].input.total_vaccinations, None);
    }

    #[test]
    fn reconcile_rejects_oversized_batch() {
        let mut config = cfg();
        config.max_rows = 1;
        let err = reconcile(vec![row("Testland"), row("Othershire")], &config).unwrap_err();
        assert!(matches!(err, VaxError::SourceShape(_)));
    }

    #[test]
    fn reconcile_rejects_multiple_dates_per_location() {
        let mut stale = row("Testland");
        stale.date = NaiveDate::from_ymd_opt(2021, 5, 31).unwrap();
        let err = reconcile(vec![row("Testland"), stale], &cfg()).unwrap_err();
        assert!(matches!(err, VaxError::SourceShape(_)));
    }

    #[test]
    fn reconcile_surfaces_unknown_vaccines() {
        let mut unknown = row("Testland");
        unknown.vaccines_used = Some("PFIZER, MYSTERYVAX".to_string());
        let err = reconcile(vec![unknown], &cfg()).unwrap_err();
        match err {
            VaxError::UnknownVaccine { tokens, .. } => {
                assert_eq!(tokens, vec!["MYSTERYVAX".to_string()]);
            }
            other => panic!("expected UnknownVaccine, got {other:?}"),
        }
    }

    #[test]
    fn manual_overrides_join_before_single_dose_classification() {
        let mut config = cfg();
        config.manual_overrides.insert(
            "Testland".to_string(),
            vec!["Johnson&Johnson".to_string()],
        );
        let mut janssen_only = row("Testland");
        janssen_only.vaccines_used = Some("JANSSEN".to_string());
        let out = reconcile(vec![janssen_only], &config).unwrap();
        assert!(out[0].single_dose_only);
        assert!(out[0].vaccines.contains("Johnson&Johnson"));

        // A two-dose override flips the classification.
        config.manual_overrides.insert(
            "Testland".to_string(),
            vec!["Pfizer/BioNTech".to_string()],
        );
        let mut janssen_only = row("Testland");
        janssen_only.vaccines_used = Some("JANSSEN".to_string());
        let out = reconcile(vec![janssen_only], &config).unwrap();
        assert!(!out[0].single_dose_only);
    }

    #[test]
    fn rows_with_no_metrics_are_not_emitted() {
        let mut empty = row("Testland");
        empty.total_vaccinations = None;
        empty.people_vaccinated = None;
        empty.people_fully_vaccinated = None;
        let out = reconcile(vec![empty], &cfg()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn totals_are_preserved_as_reported() {
        let out = reconcile(vec![row("Testland")], &cfg()).unwrap();
        assert_eq!(out[0].input.total_vaccinations, Some(1000));
        assert_eq!(out[0].input.people_vaccinated, Some(600));
    }
}
