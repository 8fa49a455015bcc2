use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{ManufacturerRecord, Observation};
use crate::error::{Result, VaxError};

/// One row of a wide cumulative-by-manufacturer table: the doses map keys
/// are canonical vaccine names, the values cumulative counts as reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WideRow {
    pub location: String,
    pub date: NaiveDate,
    pub doses: BTreeMap<String, Option<u64>>,
}

/// Pivot a wide cumulative-by-manufacturer table into long per-vaccine
/// records.
///
/// Zero or missing cells are omitted rather than emitted: "not yet
/// reported" and "confirmed zero" are different facts the downstream
/// consumer must not conflate. Each (location, vaccine) stream must be
/// non-decreasing over time.
pub fn extract(rows: &[WideRow]) -> Result<Vec<ManufacturerRecord>> {
    let mut sorted: Vec<&WideRow> = rows.iter().collect();
    sorted.sort_by(|a, b| (&a.location, a.date).cmp(&(&b.location, b.date)));

    let mut last_seen: BTreeMap<(String, String), (NaiveDate, u64)> = BTreeMap::new();
    let mut records = Vec::new();
    for row in sorted {
        for (vaccine, value) in &row.doses {
            let value = match value {
                Some(v) if *v > 0 => *v,
                _ => continue,
            };
            let key = (row.location.clone(), vaccine.clone());
            if let Some((prior_date, prior)) = last_seen.get(&key) {
                if value < *prior {
                    return Err(VaxError::Regression {
                        location: row.location.clone(),
                        field: vaccine.clone(),
                        prior_date: *prior_date,
                        prior: *prior,
                        date: row.date,
                        current: value,
                    });
                }
            }
            last_seen.insert(key, (row.date, value));
            records.push(ManufacturerRecord {
                location: row.location.clone(),
                date: row.date,
                vaccine: vaccine.clone(),
                total_vaccinations: value,
            });
        }
    }
    Ok(records)
}

/// Partial reporting is allowed, but for any (location, date) the sum over
/// vaccines must never exceed the all-manufacturer total the main series
/// reports.
pub fn check_against_series(records: &[ManufacturerRecord], series: &[Observation]) -> Result<()> {
    let mut sums: BTreeMap<(&str, NaiveDate), u64> = BTreeMap::new();
    for record in records {
        *sums
            .entry((record.location.as_str(), record.date))
            .or_default() += record.total_vaccinations;
    }
    for obs in series {
        if let (Some(total), Some(sum)) = (
            obs.total_vaccinations,
            sums.get(&(obs.location.as_str(), obs.date)),
        ) {
            if *sum > total {
                return Err(VaxError::DoseOrder {
                    location: obs.location.clone(),
                    date: obs.date,
                    upper_field: "total_vaccinations",
                    upper: total,
                    lower_field: "manufacturer_sum",
                    lower: *sum,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, day).unwrap()
    }

    fn wide(day: u32, pfizer: Option<u64>, moderna: Option<u64>) -> WideRow {
        WideRow {
            location: "Testland".to_string(),
            date: date(day),
            doses: BTreeMap::from([
                ("Pfizer/BioNTech".to_string(), pfizer),
                ("Moderna".to_string(), moderna),
            ]),
        }
    }

    #[test]
    fn zero_and_missing_cells_are_omitted() {
        let records = extract(&[wide(1, Some(100), Some(0)), wide(2, Some(150), None)]).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.vaccine == "Pfizer/BioNTech"));
    }

    #[test]
    fn streams_are_pivoted_long() {
        let records = extract(&[wide(1, Some(100), Some(30))]).unwrap();
        assert_eq!(records.len(), 2);
        let vaccines: Vec<&str> = records.iter().map(|r| r.vaccine.as_str()).collect();
        assert_eq!(vaccines, vec!["Moderna", "Pfizer/BioNTech"]);
    }

    #[test]
    fn per_stream_regression_is_rejected() {
        let err = extract(&[wide(1, Some(100), Some(30)), wide(2, Some(90), Some(40))])
            .unwrap_err();
        match err {
            VaxError::Regression { field, prior, current, .. } => {
                assert_eq!(field, "Pfizer/BioNTech");
                assert_eq!(prior, 100);
                assert_eq!(current, 90);
            }
            other => panic!("expected Regression, got {other:?}"),
        }
    }

    #[test]
    fn regression_check_spans_unreported_gaps() {
        let err = extract(&[
            wide(1, Some(100), None),
            wide(2, None, Some(10)),
            wide(3, Some(80), Some(20)),
        ])
        .unwrap_err();
        assert!(matches!(err, VaxError::Regression { .. }));
    }

    #[test]
    fn manufacturer_sum_may_trail_but_not_exceed_series_total() {
        let records = extract(&[wide(1, Some(100), Some(30))]).unwrap();
        let mut obs = Observation {
            location: "Testland".to_string(),
            date: date(1),
            total_vaccinations: Some(200),
            people_vaccinated: None,
            people_fully_vaccinated: None,
            total_boosters: None,
            vaccine: "Moderna, Pfizer/BioNTech".to_string(),
            source_url: "https://example.org".to_string(),
        };
        check_against_series(&records, std::slice::from_ref(&obs)).unwrap();

        obs.total_vaccinations = Some(120);
        let err = check_against_series(&records, std::slice::from_ref(&obs)).unwrap_err();
        assert!(matches!(err, VaxError::DoseOrder { .. }));
    }
}
