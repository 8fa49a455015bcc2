use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::domain::{ManufacturerMetadata, ManufacturerRecord};
use crate::error::Result;
use crate::series::Series;

/// Persistence boundary for per-location series and manufacturer tables.
///
/// The merge engine's read-modify-write must be serialized per location:
/// callers hold the guard from `acquire_location` across load, merge and
/// save. Cross-location writes need no coordination.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Advisory per-location lock; one writer per location at a time.
    async fn acquire_location(&self, location: &str) -> OwnedMutexGuard<()>;

    async fn load_series(&self, location: &str) -> Result<Option<Series>>;
    async fn save_series(&self, series: &Series) -> Result<()>;

    async fn save_manufacturer(
        &self,
        records: &[ManufacturerRecord],
        metadata: &ManufacturerMetadata,
    ) -> Result<()>;

    /// Idempotency sidecar: the ingest key of the last successfully
    /// persisted payload, keyed by source (a location may have several,
    /// e.g. a series source and a manufacturer source).
    async fn load_ingest_key(&self, source_id: &str) -> Result<Option<String>>;
    async fn save_ingest_key(&self, source_id: &str, key: &str) -> Result<()>;
}

/// Lazily created per-location advisory locks shared by both stores.
#[derive(Default)]
struct LocationLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocationLocks {
    fn handle(&self, location: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(location.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Filesystem store publishing the output contract: one date-ascending CSV
/// per location, a manufacturer CSV plus metadata sidecar, and ingest-key
/// sidecars. Writes land in a temp file first and are renamed into place
/// so a rejected merge never clobbers the prior series.
pub struct FsStore {
    root: PathBuf,
    locks: LocationLocks,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LocationLocks::default(),
        }
    }

    fn series_path(&self, location: &str) -> PathBuf {
        self.root.join(format!("{}.csv", file_stem(location)))
    }

    fn manufacturer_path(&self, location: &str) -> PathBuf {
        self.root
            .join("by_manufacturer")
            .join(format!("{}.csv", file_stem(location)))
    }

    fn metadata_path(&self, location: &str) -> PathBuf {
        self.root
            .join("by_manufacturer")
            .join(format!("{}.meta.json", file_stem(location)))
    }

    fn ingest_key_path(&self, source_id: &str) -> PathBuf {
        self.root
            .join(".ingest")
            .join(format!("{}.key", file_stem(source_id)))
    }
}

fn file_stem(location: &str) -> String {
    location.replace(['/', '\\'], "-")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl SeriesStore for FsStore {
    async fn acquire_location(&self, location: &str) -> OwnedMutexGuard<()> {
        self.locks.handle(location).lock_owned().await
    }

    async fn load_series(&self, location: &str) -> Result<Option<Series>> {
        let path = self.series_path(location);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path)?;
        Series::read_csv(location, file).map(Some)
    }

    async fn save_series(&self, series: &Series) -> Result<()> {
        let mut buf = Vec::new();
        series.write_csv(&mut buf)?;
        let path = self.series_path(&series.location);
        write_atomic(&path, &buf)?;
        debug!(location = %series.location, rows = series.len(), path = %path.display(), "saved series");
        Ok(())
    }

    async fn save_manufacturer(
        &self,
        records: &[ManufacturerRecord],
        metadata: &ManufacturerMetadata,
    ) -> Result<()> {
        let mut buf = Vec::new();
        {
            let mut csv = csv::Writer::from_writer(&mut buf);
            for record in records {
                csv.serialize(record)?;
            }
            csv.flush()?;
        }
        write_atomic(&self.manufacturer_path(&metadata.location), &buf)?;
        let meta_json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.metadata_path(&metadata.location), &meta_json)?;
        debug!(location = %metadata.location, records = records.len(), "saved manufacturer breakdown");
        Ok(())
    }

    async fn load_ingest_key(&self, source_id: &str) -> Result<Option<String>> {
        let path = self.ingest_key_path(source_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?.trim().to_string()))
    }

    async fn save_ingest_key(&self, source_id: &str, key: &str) -> Result<()> {
        write_atomic(&self.ingest_key_path(source_id), key.as_bytes())
    }
}

/// In-memory store for development and testing.
#[derive(Default)]
pub struct InMemoryStore {
    series: Mutex<HashMap<String, Series>>,
    manufacturer: Mutex<HashMap<String, (Vec<ManufacturerRecord>, ManufacturerMetadata)>>,
    ingest_keys: Mutex<HashMap<String, String>>,
    locks: LocationLocks,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manufacturer_records(&self, location: &str) -> Option<Vec<ManufacturerRecord>> {
        self.manufacturer
            .lock()
            .unwrap()
            .get(location)
            .map(|(records, _)| records.clone())
    }
}

#[async_trait]
impl SeriesStore for InMemoryStore {
    async fn acquire_location(&self, location: &str) -> OwnedMutexGuard<()> {
        self.locks.handle(location).lock_owned().await
    }

    async fn load_series(&self, location: &str) -> Result<Option<Series>> {
        Ok(self.series.lock().unwrap().get(location).cloned())
    }

    async fn save_series(&self, series: &Series) -> Result<()> {
        self.series
            .lock()
            .unwrap()
            .insert(series.location.clone(), series.clone());
        Ok(())
    }

    async fn save_manufacturer(
        &self,
        records: &[ManufacturerRecord],
        metadata: &ManufacturerMetadata,
    ) -> Result<()> {
        self.manufacturer.lock().unwrap().insert(
            metadata.location.clone(),
            (records.to_vec(), metadata.clone()),
        );
        Ok(())
    }

    async fn load_ingest_key(&self, source_id: &str) -> Result<Option<String>> {
        Ok(self.ingest_keys.lock().unwrap().get(source_id).cloned())
    }

    async fn save_ingest_key(&self, source_id: &str, key: &str) -> Result<()> {
        self.ingest_keys
            .lock()
            .unwrap()
            .insert(source_id.to_string(), key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;
    use chrono::NaiveDate;

    fn series() -> Series {
        let mut series = Series::new("Testland");
        series
            .merge(Observation {
                location: "Testland".to_string(),
                date: NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
                total_vaccinations: Some(1000),
                people_vaccinated: Some(600),
                people_fully_vaccinated: None,
                total_boosters: None,
                vaccine: "Pfizer/BioNTech".to_string(),
                source_url: "https://example.org".to_string(),
            })
            .unwrap();
        series
    }

    #[tokio::test]
    async fn fs_store_round_trips_series() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let series = series();
        store.save_series(&series).await.unwrap();
        let reloaded = store.load_series("Testland").await.unwrap().unwrap();
        assert_eq!(reloaded, series);
    }

    #[tokio::test]
    async fn fs_store_missing_series_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.load_series("Nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_round_trips_ingest_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.load_ingest_key("testland_moh").await.unwrap().is_none());
        store.save_ingest_key("testland_moh", "abc123").await.unwrap();
        assert_eq!(
            store.load_ingest_key("testland_moh").await.unwrap().as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn fs_store_writes_manufacturer_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let records = vec![ManufacturerRecord {
            location: "Testland".to_string(),
            date: NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
            vaccine: "Pfizer/BioNTech".to_string(),
            total_vaccinations: 1000,
        }];
        let metadata = ManufacturerMetadata {
            location: "Testland".to_string(),
            vaccine_source_name: "Public Health Testland".to_string(),
            source_url: "https://example.org".to_string(),
        };
        store.save_manufacturer(&records, &metadata).await.unwrap();

        let csv_path = dir.path().join("by_manufacturer").join("Testland.csv");
        let text = fs::read_to_string(csv_path).unwrap();
        assert!(text.contains("Pfizer/BioNTech"));
        let meta_path = dir.path().join("by_manufacturer").join("Testland.meta.json");
        let meta: ManufacturerMetadata =
            serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta, metadata);
    }

    #[tokio::test]
    async fn location_locks_are_reentrant_across_calls() {
        let store = InMemoryStore::new();
        let guard = store.acquire_location("Testland").await;
        drop(guard);
        let _guard = store.acquire_location("Testland").await;
    }
}
