use std::io::{Read, Write};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::Observation;
use crate::error::{Result, VaxError};
use crate::validate::{check_non_regression, validate_series};

/// Outcome of merging one observation into a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No entry existed for the date; inserted in order.
    Inserted,
    /// An entry existed for the date and was replaced (upsert).
    Replaced,
    /// The identical observation was already present; no-op.
    Unchanged,
}

/// The canonical, append-only time series for one location: date-ascending,
/// at most one observation per date, cumulative fields non-decreasing.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub location: String,
    observations: Vec<Observation>,
}

impl Series {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            observations: Vec::new(),
        }
    }

    /// Build a series from pre-validated observations; rejects input that
    /// is out of order or regresses.
    pub fn from_observations(
        location: impl Into<String>,
        observations: Vec<Observation>,
    ) -> Result<Self> {
        validate_series(&observations)?;
        Ok(Self {
            location: location.into(),
            observations,
        })
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// The most recent observation strictly before `date`, used as the
    /// prior for validation.
    pub fn latest_before(&self, date: NaiveDate) -> Option<&Observation> {
        let idx = self.observations.partition_point(|o| o.date < date);
        idx.checked_sub(1).map(|i| &self.observations[i])
    }

    /// Merge one observation, keyed by date.
    ///
    /// Upsert semantics: the newest write for a date always wins, which
    /// makes re-running a source idempotent. After placement the
    /// non-regression invariant is re-checked against the immediate
    /// predecessor and successor only; a violation rejects the merge and
    /// leaves the series untouched.
    pub fn merge(&mut self, observation: Observation) -> Result<MergeOutcome> {
        if observation.location != self.location {
            return Err(VaxError::Config(format!(
                "observation for {} merged into series for {}",
                observation.location, self.location
            )));
        }
        match self
            .observations
            .binary_search_by(|o| o.date.cmp(&observation.date))
        {
            Ok(idx) => {
                if self.observations[idx] == observation {
                    return Ok(MergeOutcome::Unchanged);
                }
                if idx > 0 {
                    check_non_regression(&self.observations[idx - 1], &observation)?;
                }
                if let Some(next) = self.observations.get(idx + 1) {
                    check_non_regression(&observation, next)?;
                }
                self.observations[idx] = observation;
                Ok(MergeOutcome::Replaced)
            }
            Err(idx) => {
                if idx > 0 {
                    check_non_regression(&self.observations[idx - 1], &observation)?;
                }
                if let Some(next) = self.observations.get(idx) {
                    check_non_regression(&observation, next)?;
                }
                self.observations.insert(idx, observation);
                Ok(MergeOutcome::Inserted)
            }
        }
    }

    /// Replace the whole series with a batch re-export, accepted only when
    /// the batch itself satisfies the series invariants.
    pub fn replace_all(&mut self, mut batch: Vec<Observation>) -> Result<()> {
        batch.sort_by_key(|o| o.date);
        validate_series(&batch)?;
        if let Some(stray) = batch.iter().find(|o| o.location != self.location) {
            return Err(VaxError::Config(format!(
                "batch for {} contains a row for {}",
                self.location, stray.location
            )));
        }
        self.observations = batch;
        Ok(())
    }

    /// Write the series as the published CSV shape. Optional columns that
    /// the location never reports are dropped entirely rather than emitted
    /// as empty columns.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let has_fully = self
            .observations
            .iter()
            .any(|o| o.people_fully_vaccinated.is_some());
        let has_boosters = self.observations.iter().any(|o| o.total_boosters.is_some());

        let mut csv = csv::Writer::from_writer(writer);
        let mut header = vec!["date", "total_vaccinations", "people_vaccinated"];
        if has_fully {
            header.push("people_fully_vaccinated");
        }
        if has_boosters {
            header.push("total_boosters");
        }
        header.push("vaccine");
        header.push("source_url");
        csv.write_record(&header)?;

        for obs in &self.observations {
            let mut record = vec![
                obs.date.format("%Y-%m-%d").to_string(),
                format_count(obs.total_vaccinations),
                format_count(obs.people_vaccinated),
            ];
            if has_fully {
                record.push(format_count(obs.people_fully_vaccinated));
            }
            if has_boosters {
                record.push(format_count(obs.total_boosters));
            }
            record.push(obs.vaccine.clone());
            record.push(obs.source_url.clone());
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Read a previously published per-location CSV back into a series.
    /// Columns absent from the file deserialize as unknown, not zero.
    pub fn read_csv<R: Read>(location: impl Into<String>, reader: R) -> Result<Self> {
        let location = location.into();
        let mut csv = csv::Reader::from_reader(reader);
        let mut observations = Vec::new();
        for row in csv.deserialize::<SeriesRow>() {
            let row = row?;
            observations.push(Observation {
                location: location.clone(),
                date: row.date,
                total_vaccinations: row.total_vaccinations,
                people_vaccinated: row.people_vaccinated,
                people_fully_vaccinated: row.people_fully_vaccinated,
                total_boosters: row.total_boosters,
                vaccine: row.vaccine,
                source_url: row.source_url,
            });
        }
        Self::from_observations(location, observations)
    }
}

fn format_count(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// On-disk row shape; `location` is implied by the file, per the output
/// contract.
#[derive(Debug, Serialize, Deserialize)]
struct SeriesRow {
    date: NaiveDate,
    #[serde(default)]
    total_vaccinations: Option<u64>,
    #[serde(default)]
    people_vaccinated: Option<u64>,
    #[serde(default)]
    people_fully_vaccinated: Option<u64>,
    #[serde(default)]
    total_boosters: Option<u64>,
    vaccine: String,
    source_url: String,
}
