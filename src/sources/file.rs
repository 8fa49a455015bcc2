use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clean::{clean_count, clean_date};
use crate::domain::ManufacturerMetadata;
use crate::error::{Result, VaxError};
use crate::manufacturer::WideRow;
use crate::reconcile::FeedRow;
use crate::sources::{ObservationInput, SourcePayload, VaxSource};
use crate::taxonomy;

/// What shape a collaborator payload file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// JSON `ObservationInput`.
    Observation,
    /// JSON array of `ObservationInput`.
    Batch,
    /// CSV aggregate feed, one row per location.
    Feed,
    /// CSV wide table, one cumulative column per manufacturer.
    Manufacturer,
}

/// Collaborator adapter reading payload files dropped on disk.
///
/// This is the file half of the input contract: scrapers write whatever
/// they discovered as JSON or CSV and the core picks it up from here.
/// Column names in CSV payloads are translated through `columns`
/// (our field name -> the feed's header) before parsing.
pub struct FileSource {
    pub source_id: String,
    pub location: String,
    pub path: PathBuf,
    pub kind: PayloadKind,
    pub columns: HashMap<String, String>,
    pub date_format: String,
    /// Raw manufacturer column tokens -> canonical names (wide tables).
    pub vaccine_mapping: HashMap<String, String>,
    /// Sidecar metadata for manufacturer payloads.
    pub metadata: Option<ManufacturerMetadata>,
}

impl FileSource {
    pub fn new(
        source_id: impl Into<String>,
        location: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: PayloadKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            location: location.into(),
            path: path.into(),
            kind,
            columns: HashMap::new(),
            date_format: "%Y-%m-%d".to_string(),
            vaccine_mapping: HashMap::new(),
            metadata: None,
        }
    }

    fn column<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }

    fn parse_feed(&self, text: &str) -> Result<Vec<FeedRow>> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader.headers()?.clone();
        let index = |field: &str| -> Result<usize> {
            let name = self.column(field);
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| VaxError::MissingField(format!("feed column '{name}'")))
        };
        let location_idx = index("location")?;
        let date_idx = index("date")?;
        let channel_idx = index("data_source")?;
        let total_idx = index("total_vaccinations")?;
        let people_idx = index("people_vaccinated")?;
        let fully_idx = index("people_fully_vaccinated")?;
        let vaccines_idx = index("vaccines_used")?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).unwrap_or("").trim();
            rows.push(FeedRow {
                location: cell(location_idx).to_string(),
                date: clean_date(cell(date_idx), &self.date_format)?,
                data_source: cell(channel_idx).to_string(),
                total_vaccinations: parse_float(cell(total_idx))?,
                people_vaccinated: parse_float(cell(people_idx))?,
                people_fully_vaccinated: parse_float(cell(fully_idx))?,
                vaccines_used: non_empty(cell(vaccines_idx)),
            });
        }
        debug!(source = %self.source_id, rows = rows.len(), "parsed feed payload");
        Ok(rows)
    }

    fn parse_wide(&self, text: &str) -> Result<Vec<WideRow>> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader.headers()?.clone();
        let location_col = self.column("location");
        let date_col = self.column("date");
        let date_idx = headers
            .iter()
            .position(|h| h == date_col)
            .ok_or_else(|| VaxError::MissingField(format!("wide-table column '{date_col}'")))?;
        let location_idx = headers.iter().position(|h| h == location_col);

        // Every remaining column is a manufacturer; its header must resolve
        // through the vaccine mapping.
        let mut vaccine_cols = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == date_idx || Some(idx) == location_idx {
                continue;
            }
            let resolved = taxonomy::resolve(
                &[header.to_string()],
                &self.vaccine_mapping,
                &self.location,
            )?;
            let canonical = resolved
                .into_iter()
                .next()
                .ok_or_else(|| VaxError::MissingField(format!("empty manufacturer column at {idx}")))?;
            vaccine_cols.push((idx, canonical));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let location = match location_idx {
                Some(idx) => record.get(idx).unwrap_or("").trim().to_string(),
                None => self.location.clone(),
            };
            let mut doses = BTreeMap::new();
            for (idx, vaccine) in &vaccine_cols {
                let cell = record.get(*idx).unwrap_or("").trim();
                let value = if cell.is_empty() {
                    None
                } else {
                    Some(clean_count(cell)?)
                };
                doses.insert(vaccine.clone(), value);
            }
            rows.push(WideRow {
                location,
                date: clean_date(record.get(date_idx).unwrap_or(""), &self.date_format)?,
                doses,
            });
        }
        debug!(source = %self.source_id, rows = rows.len(), "parsed wide manufacturer payload");
        Ok(rows)
    }
}

fn parse_float(cell: &str) -> Result<Option<f64>> {
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|_| VaxError::InvalidCount(cell.to_string()))
}

fn non_empty(cell: &str) -> Option<String> {
    if cell.is_empty() {
        None
    } else {
        Some(cell.to_string())
    }
}

#[async_trait]
impl VaxSource for FileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn fetch(&self) -> Result<SourcePayload> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        match self.kind {
            PayloadKind::Observation => {
                let input: ObservationInput = serde_json::from_str(&text)?;
                Ok(SourcePayload::Single(input))
            }
            PayloadKind::Batch => {
                let inputs: Vec<ObservationInput> = serde_json::from_str(&text)?;
                Ok(SourcePayload::Batch(inputs))
            }
            PayloadKind::Feed => Ok(SourcePayload::Feed(self.parse_feed(&text)?)),
            PayloadKind::Manufacturer => {
                let metadata = self.metadata.clone().ok_or_else(|| {
                    VaxError::Config(format!(
                        "manufacturer payload for {} needs vaccine_source_name metadata",
                        self.location
                    ))
                })?;
                Ok(SourcePayload::Manufacturer {
                    rows: self.parse_wide(&text)?,
                    metadata,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_source() -> FileSource {
        let mut source = FileSource::new("agg", "Aggregator", "unused.csv", PayloadKind::Feed);
        source.columns = HashMap::from([
            ("location".to_string(), "COUNTRY".to_string()),
            ("date".to_string(), "DATE_UPDATED".to_string()),
            ("data_source".to_string(), "DATA_SOURCE".to_string()),
            ("total_vaccinations".to_string(), "TOTAL_VACCINATIONS".to_string()),
            (
                "people_vaccinated".to_string(),
                "PERSONS_VACCINATED_1PLUS_DOSE".to_string(),
            ),
            (
                "people_fully_vaccinated".to_string(),
                "PERSONS_FULLY_VACCINATED".to_string(),
            ),
            ("vaccines_used".to_string(), "VACCINES_USED".to_string()),
        ]);
        source
    }

    #[test]
    fn feed_csv_parses_through_column_mapping() {
        let csv_text = "\
COUNTRY,DATE_UPDATED,DATA_SOURCE,TOTAL_VACCINATIONS,PERSONS_VACCINATED_1PLUS_DOSE,PERSONS_FULLY_VACCINATED,VACCINES_USED
Testland,2021-06-01,REPORTING,1000,600.0,,PFIZER
";
        let rows = feed_source().parse_feed(csv_text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, "Testland");
        assert_eq!(rows[0].total_vaccinations, Some(1000.0));
        assert_eq!(rows[0].people_vaccinated, Some(600.0));
        assert_eq!(rows[0].people_fully_vaccinated, None);
        assert_eq!(rows[0].vaccines_used.as_deref(), Some("PFIZER"));
    }

    #[test]
    fn feed_csv_rejects_missing_mapped_column() {
        let csv_text = "COUNTRY,DATE_UPDATED\nTestland,2021-06-01\n";
        let err = feed_source().parse_feed(csv_text).unwrap_err();
        assert!(matches!(err, VaxError::MissingField(_)));
    }

    #[test]
    fn wide_csv_resolves_manufacturer_columns() {
        let mut source =
            FileSource::new("mfr", "Testland", "unused.csv", PayloadKind::Manufacturer);
        source.vaccine_mapping = HashMap::from([
            ("pfizer".to_string(), "Pfizer/BioNTech".to_string()),
            ("moderna".to_string(), "Moderna".to_string()),
        ]);
        let csv_text = "date,pfizer,moderna\n2021-06-01,1 000,\n2021-06-02,1200,300\n";
        let rows = source.parse_wide(csv_text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].location, "Testland");
        assert_eq!(rows[0].doses["Pfizer/BioNTech"], Some(1000));
        assert_eq!(rows[0].doses["Moderna"], None);
        assert_eq!(rows[1].doses["Moderna"], Some(300));
    }

    #[test]
    fn wide_csv_fails_on_unknown_manufacturer_column() {
        let source = FileSource::new("mfr", "Testland", "unused.csv", PayloadKind::Manufacturer);
        let err = source.parse_wide("date,mystery\n2021-06-01,5\n").unwrap_err();
        assert!(matches!(err, VaxError::UnknownVaccine { .. }));
    }
}
