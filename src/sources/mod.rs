use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::ManufacturerMetadata;
use crate::error::Result;
use crate::manufacturer::WideRow;
use crate::reconcile::FeedRow;

pub mod file;

pub use file::FileSource;

/// The denormalized shape a collaborator hands the core for one location
/// and date: whichever fields it was able to discover. Absent fields mean
/// unknown, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationInput {
    pub location: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub total_vaccinations: Option<u64>,
    #[serde(default)]
    pub people_vaccinated: Option<u64>,
    #[serde(default)]
    pub people_fully_vaccinated: Option<u64>,
    #[serde(default)]
    pub total_boosters: Option<u64>,
    /// Raw source tokens, resolved through the location's vaccine mapping.
    /// May be empty when the location configuration carries a fixed list.
    #[serde(default)]
    pub vaccines: Vec<String>,
    /// Filled from the location configuration when the payload does not
    /// carry its own.
    #[serde(default)]
    pub source_url: String,
    /// Directly-reported percentage fields, validated but not published.
    #[serde(default)]
    pub people_vaccinated_per_hundred: Option<f64>,
    #[serde(default)]
    pub people_fully_vaccinated_per_hundred: Option<f64>,
}

/// Everything a collaborator may hand the core in one fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourcePayload {
    /// One denormalized observation (incremental sources).
    Single(ObservationInput),
    /// A full re-export of the location's history (batch sources).
    Batch(Vec<ObservationInput>),
    /// An aggregate feed reporting many locations at once.
    Feed(Vec<FeedRow>),
    /// A wide cumulative-by-manufacturer table plus its sidecar metadata.
    Manufacturer {
        rows: Vec<WideRow>,
        metadata: ManufacturerMetadata,
    },
}

/// Core trait every source collaborator implements. Fetching and parsing
/// concrete upstreams (network, DOM, PDF tables) happens behind this
/// boundary; the core only sees the input contract.
#[async_trait]
pub trait VaxSource: Send + Sync {
    /// Unique identifier for this collaborator.
    fn source_id(&self) -> &str;

    /// Canonical location this collaborator reports for; a label for
    /// multi-location feeds.
    fn location(&self) -> &str;

    /// Hand over whatever the collaborator discovered.
    async fn fetch(&self) -> Result<SourcePayload>;
}
