//! One avro artifact per item bucket under `<cache_dir>/<name>/<bucket>.avro`.
//!
//! Artifacts are written through a temporary file and only renamed into place once
//! complete, so an existing file always holds a fully built bucket.

use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::covisitation::WeightedPair;
use crate::errors::{CovisError, Result};
use crate::io::{read_avro, write_avro_atomic, ItemId};

const PAIR_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "weighted_pair",
    "fields": [
        {"name": "item_x", "type": "long"},
        {"name": "item_y", "type": "long"},
        {"name": "weight", "type": "int"}
    ]
}
"#;

#[derive(Debug, Serialize, Deserialize)]
struct PairRecord {
    item_x: i64,
    item_y: i64,
    weight: i32,
}

impl From<&WeightedPair> for PairRecord {
    fn from(pair: &WeightedPair) -> Self {
        PairRecord {
            item_x: i64::from(pair.item_x),
            item_y: i64::from(pair.item_y),
            weight: pair.weight,
        }
    }
}

impl PairRecord {
    fn into_pair(self, row: usize) -> Result<WeightedPair> {
        let to_item = |value: i64| {
            ItemId::try_from(value).map_err(|_| CovisError::Parse {
                line: row + 1,
                reason: format!("item id {} out of range", value),
            })
        };
        Ok(WeightedPair {
            item_x: to_item(self.item_x)?,
            item_y: to_item(self.item_y)?,
            weight: self.weight,
        })
    }
}

#[derive(Clone, Debug)]
pub struct MatrixStore {
    dir: PathBuf,
    n_buckets: usize,
}

impl MatrixStore {
    pub fn new<P: AsRef<Path>>(dir: P, n_buckets: usize) -> Self {
        MatrixStore {
            dir: dir.as_ref().to_path_buf(),
            n_buckets,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    pub fn bucket_path(&self, bucket: usize) -> Result<PathBuf> {
        if bucket >= self.n_buckets {
            return Err(CovisError::BucketOutOfRange {
                index: bucket,
                n_buckets: self.n_buckets,
            });
        }
        Ok(self.dir.join(format!("{}.avro", bucket)))
    }

    pub fn exists(&self, bucket: usize) -> Result<bool> {
        Ok(self.bucket_path(bucket)?.exists())
    }

    /// Persists a finished bucket. Never called for partially aggregated buckets.
    pub fn write(&self, bucket: usize, pairs: &[WeightedPair]) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&self.dir)?;
        let qty_rows = write_avro_atomic(&path, PAIR_SCHEMA, pairs.iter().map(PairRecord::from))?;
        debug!(bucket, rows = qty_rows, "wrote {}", path.display());
        Ok(())
    }

    /// Reads the pairs of a built bucket, in the order they were written.
    pub fn get(&self, bucket: usize) -> Result<Vec<WeightedPair>> {
        let path = self.bucket_path(bucket)?;
        let records: Vec<PairRecord> = read_avro(&path)?;
        records
            .into_iter()
            .enumerate()
            .map(|(row, record)| record.into_pair(row))
            .collect()
    }
}
