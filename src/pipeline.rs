use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{FeedConfig, LocationConfig};
use crate::error::{Result, VaxError};
use crate::idempotency::compute_ingest_key;
use crate::manufacturer;
use crate::reconcile::{self, ReconciledObservation};
use crate::series::{MergeOutcome, Series};
use crate::sources::{ObservationInput, SourcePayload, VaxSource};
use crate::storage::SeriesStore;
use crate::taxonomy;
use crate::validate;

/// What one location run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Merged(MergeOutcome),
    Replaced { rows: usize },
    ManufacturerExported { records: usize },
    /// The payload digest matched the last persisted run; nothing to do.
    SkippedUnchangedPayload,
    /// A regression was downgraded to a skip for a source on the
    /// configured exception list. The persisted series is untouched.
    SkippedRegression { field: String },
}

/// Result of running the pipeline for one location.
#[derive(Debug)]
pub struct IngestResult {
    pub run_id: Uuid,
    pub location: String,
    pub source_id: String,
    pub outcome: IngestOutcome,
}

/// Run the generic per-location pipeline: fetch from the collaborator,
/// resolve taxonomy, validate, merge, persist.
///
/// One parameterized pipeline replaces one hand-written chain per
/// location; everything location-specific lives in `cfg`. A failure here
/// excludes the location from this run only; its previously persisted
/// series is left unchanged.
#[instrument(skip(source, cfg, store), fields(location = %cfg.location, source_id = %cfg.source_id))]
pub async fn run_for_location(
    source: &dyn VaxSource,
    cfg: &LocationConfig,
    store: &dyn SeriesStore,
) -> Result<IngestResult> {
    let run_id = Uuid::new_v4();
    info!("🚀 starting pipeline");

    let payload = source.fetch().await?;
    let key = compute_ingest_key(
        source.source_id(),
        &cfg.location,
        &serde_json::to_vec(&payload)?,
    );

    // Single writer per location across the read-modify-write.
    let _guard = store.acquire_location(&cfg.location).await;

    if store.load_ingest_key(&cfg.source_id).await?.as_deref() == Some(key.as_str()) {
        info!("payload unchanged since last run, nothing to do");
        return Ok(IngestResult {
            run_id,
            location: cfg.location.clone(),
            source_id: cfg.source_id.clone(),
            outcome: IngestOutcome::SkippedUnchangedPayload,
        });
    }

    let outcome = match payload {
        SourcePayload::Single(input) => merge_single(input, cfg, store).await?,
        SourcePayload::Batch(inputs) => replace_batch(inputs, cfg, store).await?,
        SourcePayload::Manufacturer { rows, metadata } => {
            let records = manufacturer::extract(&rows)?;
            if let Some(series) = store.load_series(&cfg.location).await? {
                manufacturer::check_against_series(&records, series.observations())?;
            }
            let count = records.len();
            store.save_manufacturer(&records, &metadata).await?;
            IngestOutcome::ManufacturerExported { records: count }
        }
        SourcePayload::Feed(_) => {
            return Err(VaxError::Config(format!(
                "feed payload for {} must run through run_feed",
                cfg.source_id
            )))
        }
    };

    store.save_ingest_key(&cfg.source_id, &key).await?;
    info!(outcome = ?outcome, "✅ pipeline finished");
    Ok(IngestResult {
        run_id,
        location: cfg.location.clone(),
        source_id: cfg.source_id.clone(),
        outcome,
    })
}

/// Run every configured location as its own task. Locations share no
/// mutable state, so they proceed fully in parallel; per-location ordering
/// is enforced by the store's advisory locks.
pub async fn run_locations(
    jobs: Vec<(Arc<dyn VaxSource>, LocationConfig)>,
    store: Arc<dyn SeriesStore>,
) -> Vec<Result<IngestResult>> {
    let mut handles = Vec::new();
    for (source, cfg) in jobs {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            run_for_location(source.as_ref(), &cfg, store.as_ref()).await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => results.push(Err(VaxError::Config(format!("location task failed: {e}")))),
        }
    }
    results
}

/// Drive an aggregate feed: reconcile the pull, then pass each surviving
/// location independently through validate/merge/persist. Shape failures
/// reject the whole batch; a single location's data-quality failure only
/// excludes that location.
#[instrument(skip(source, cfg, store), fields(source_id = %cfg.source_id))]
pub async fn run_feed(
    source: &dyn VaxSource,
    cfg: &FeedConfig,
    store: &dyn SeriesStore,
) -> Result<Vec<(String, Result<IngestResult>)>> {
    info!("🚀 starting aggregate feed pipeline");
    let rows = match source.fetch().await? {
        SourcePayload::Feed(rows) => rows,
        _ => {
            return Err(VaxError::Config(format!(
                "source {} did not hand over a feed payload",
                cfg.source_id
            )))
        }
    };

    let reconciled = reconcile::reconcile(rows, &cfg.reconcile_config())?;
    info!(locations = reconciled.len(), "reconciled feed pull");

    let mut results = Vec::new();
    for observation in reconciled {
        let location = observation.input.location.clone();
        let result = merge_reconciled(observation, cfg, store).await;
        match &result {
            Ok(result) => info!(location = %location, outcome = ?result.outcome, "✅ merged feed location"),
            Err(e) => warn!(location = %location, error = %e, "feed location excluded from this run"),
        }
        results.push((location, result));
    }
    Ok(results)
}

async fn merge_reconciled(
    observation: ReconciledObservation,
    cfg: &FeedConfig,
    store: &dyn SeriesStore,
) -> Result<IngestResult> {
    let ReconciledObservation {
        input,
        vaccines,
        single_dose_only,
    } = observation;
    let run_id = Uuid::new_v4();
    let location = input.location.clone();
    let allow_regressions = cfg.allow_regressions.iter().any(|l| l == &location);

    let _guard = store.acquire_location(&location).await;
    let mut series = store
        .load_series(&location)
        .await?
        .unwrap_or_else(|| Series::new(&location));
    let prior = series.latest_before(input.date).cloned();

    let merged = validate::validate(&input, &vaccines, prior.as_ref(), single_dose_only)
        .and_then(|obs| series.merge(obs));
    let outcome = match merged {
        Ok(outcome) => {
            if outcome != MergeOutcome::Unchanged {
                store.save_series(&series).await?;
            }
            IngestOutcome::Merged(outcome)
        }
        Err(VaxError::Regression { field, .. }) if allow_regressions => {
            warn!(location = %location, field = %field, "regression skipped per exception list");
            IngestOutcome::SkippedRegression { field }
        }
        Err(e) => return Err(e),
    };
    Ok(IngestResult {
        run_id,
        location,
        source_id: cfg.source_id.clone(),
        outcome,
    })
}

async fn merge_single(
    mut input: ObservationInput,
    cfg: &LocationConfig,
    store: &dyn SeriesStore,
) -> Result<IngestOutcome> {
    if input.location != cfg.location {
        return Err(VaxError::Config(format!(
            "payload for {} handed to the {} pipeline",
            input.location, cfg.location
        )));
    }
    if input.source_url.is_empty() {
        input.source_url = cfg.source_url.clone();
    }
    let (vaccines, single_dose_only) = resolve_for(&input, cfg)?;

    let mut series = store
        .load_series(&cfg.location)
        .await?
        .unwrap_or_else(|| Series::new(&cfg.location));
    let prior = series.latest_before(input.date).cloned();

    let merged = validate::validate(&input, &vaccines, prior.as_ref(), single_dose_only)
        .and_then(|obs| series.merge(obs));
    match merged {
        Ok(outcome) => {
            if outcome != MergeOutcome::Unchanged {
                store.save_series(&series).await?;
            }
            Ok(IngestOutcome::Merged(outcome))
        }
        Err(VaxError::Regression { field, .. }) if cfg.allow_regressions => {
            warn!(location = %cfg.location, field = %field, "regression skipped per exception list");
            Ok(IngestOutcome::SkippedRegression { field })
        }
        Err(e) => Err(e),
    }
}

async fn replace_batch(
    mut inputs: Vec<ObservationInput>,
    cfg: &LocationConfig,
    store: &dyn SeriesStore,
) -> Result<IngestOutcome> {
    inputs.sort_by_key(|i| i.date);
    let mut batch = Vec::with_capacity(inputs.len());
    for mut input in inputs {
        if input.location != cfg.location {
            return Err(VaxError::Config(format!(
                "batch for {} contains a row for {}",
                cfg.location, input.location
            )));
        }
        if input.source_url.is_empty() {
            input.source_url = cfg.source_url.clone();
        }
        let (vaccines, single_dose_only) = resolve_for(&input, cfg)?;
        let observation =
            validate::validate(&input, &vaccines, batch.last(), single_dose_only)?;
        batch.push(observation);
    }

    let mut series = store
        .load_series(&cfg.location)
        .await?
        .unwrap_or_else(|| Series::new(&cfg.location));
    let rows = batch.len();
    series.replace_all(batch)?;
    store.save_series(&series).await?;
    Ok(IngestOutcome::Replaced { rows })
}

/// Resolve the vaccine set for one input: payload tokens when present,
/// otherwise the fixed list from the location configuration.
fn resolve_for(
    input: &ObservationInput,
    cfg: &LocationConfig,
) -> Result<(std::collections::BTreeSet<String>, bool)> {
    let raw = if input.vaccines.is_empty() {
        &cfg.vaccines
    } else {
        &input.vaccines
    };
    let vaccines = taxonomy::resolve(raw, &cfg.vaccine_mapping, &cfg.location)?;
    let single_dose_only = taxonomy::is_single_dose_only(&vaccines, &taxonomy::one_dose_set());
    Ok((vaccines, single_dose_only))
}
