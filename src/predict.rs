use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::info;

use crate::covisitation::standard::StandardMatrix;
use crate::covisitation::topk::TopKMapping;
use crate::covisitation::CoVisitationMatrix;
use crate::dataframeutils::EventTable;
use crate::errors::{CovisError, Result};
use crate::io::{read_submission, write_submission, EventType, ItemId, SubmissionRow};
use crate::suggest::{suggest_buys, suggest_clicks, top_popular, MAX_CANDIDATES};

/// Which held-out sessions are predicted; selects the prediction cache directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetType {
    Validation,
    Test,
}

impl DatasetType {
    pub fn name(self) -> &'static str {
        match self {
            DatasetType::Validation => "validation",
            DatasetType::Test => "test",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetType {
    type Err = CovisError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "validation" => Ok(DatasetType::Validation),
            "test" => Ok(DatasetType::Test),
            other => Err(CovisError::InvalidDatasetType(other.to_string())),
        }
    }
}

/// Top-K mappings of the three standard matrices.
#[derive(Clone, Debug, Default)]
pub struct CandidateMappings {
    pub clicks: TopKMapping,
    pub carts_orders: TopKMapping,
    pub buy2buy: TopKMapping,
}

impl CandidateMappings {
    /// Builds the three standard matrices under `cache_dir` where missing and loads
    /// their top-K mappings.
    pub fn build<P: AsRef<Path>>(
        train: &EventTable,
        cache_dir: P,
        n_buckets: usize,
        max_memory_gb: f64,
        top_n: usize,
    ) -> Result<CandidateMappings> {
        let mut mappings = CandidateMappings::default();
        for kind in StandardMatrix::ALL {
            let spec = kind.spec(train, n_buckets, max_memory_gb)?;
            let matrix = CoVisitationMatrix::new(train, kind.name(), cache_dir.as_ref(), spec)?;
            matrix.make(kind.max_time_delta())?;
            let mapping = matrix.get_dict(top_n)?;
            info!(matrix = kind.name(), items = mapping.len(), "loaded top {}", top_n);
            match kind {
                StandardMatrix::Clicks => mappings.clicks = mapping,
                StandardMatrix::CartsOrders => mappings.carts_orders = mapping,
                StandardMatrix::Buy2Buy => mappings.buy2buy = mapping,
            }
        }
        Ok(mappings)
    }
}

/// Most popular items of the target sessions, used to pad short candidate lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PopularityFallback {
    pub clicks: Vec<ItemId>,
    pub orders: Vec<ItemId>,
}

impl PopularityFallback {
    pub fn from_table(target: &EventTable) -> Self {
        PopularityFallback {
            clicks: top_popular(target, EventType::Clicks, MAX_CANDIDATES),
            orders: top_popular(target, EventType::Orders, MAX_CANDIDATES),
        }
    }
}

/// One row per session and event type, ordered by session then clicks, carts, orders.
/// Carts and orders share the buy candidates.
pub fn predict_sessions(
    target: &EventTable,
    mappings: &CandidateMappings,
    fallback: &PopularityFallback,
) -> Result<Vec<SubmissionRow>> {
    target.precheck_sorted_sessions()?;
    let session_ranges = target.session_ranges();
    let pb = ProgressBar::new(session_ranges.len() as u64);
    let rows = session_ranges
        .into_par_iter()
        .flat_map(|rows| {
            let session = target.session_view(rows);
            let clicks = suggest_clicks(&session, &mappings.clicks, &fallback.clicks);
            let buys = suggest_buys(
                &session,
                &mappings.carts_orders,
                &mappings.buy2buy,
                &fallback.orders,
            );
            pb.inc(1);
            vec![
                SubmissionRow::new(session.session, EventType::Clicks, clicks),
                SubmissionRow::new(session.session, EventType::Carts, buys.clone()),
                SubmissionRow::new(session.session, EventType::Orders, buys),
            ]
        })
        .collect();
    pb.finish_and_clear();
    Ok(rows)
}

pub fn predictions_path<P: AsRef<Path>>(cache_dir: P, dataset_type: DatasetType) -> PathBuf {
    cache_dir
        .as_ref()
        .join(dataset_type.name())
        .join("predictions.csv")
}

/// Predictions for a dataset type, memoized under `<cache_dir>/<dataset_type>/`.
pub fn get_predictions<P: AsRef<Path>>(
    dataset_type: DatasetType,
    target: &EventTable,
    mappings: &CandidateMappings,
    cache_dir: P,
) -> Result<Vec<SubmissionRow>> {
    let target_path = predictions_path(&cache_dir, dataset_type);
    if target_path.exists() {
        info!("loading {}", target_path.display());
        return read_submission(&target_path);
    }

    let fallback = PopularityFallback::from_table(target);
    let rows = predict_sessions(target, mappings, &fallback)?;
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_submission(&target_path, &rows)?;
    info!(rows = rows.len(), "wrote {}", target_path.display());
    Ok(rows)
}
