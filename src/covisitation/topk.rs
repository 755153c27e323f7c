//! Reduces built buckets to the `top_n` heaviest neighbours per source item.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use indicatif::ProgressBar;
use tracing::info;

use crate::covisitation::store::MatrixStore;
use crate::covisitation::WeightedPair;
use crate::errors::{CovisError, Result};
use crate::io::{temporary_path, ItemId};

/// Source item to its neighbours, heaviest first.
pub type TopKMapping = HashMap<ItemId, Vec<ItemId>>;

/// Keeps at most `top_n` pairs per `item_x`, ordered by `item_x` ascending,
/// weight descending, then `item_y` ascending.
pub fn top_pairs(mut pairs: Vec<WeightedPair>, top_n: usize) -> Vec<WeightedPair> {
    pairs.sort_unstable_by(|a, b| {
        a.item_x
            .cmp(&b.item_x)
            .then(b.weight.cmp(&a.weight))
            .then(a.item_y.cmp(&b.item_y))
    });
    let mut kept = Vec::with_capacity(pairs.len());
    let mut current = None;
    let mut rank = 0;
    for pair in pairs {
        if current != Some(pair.item_x) {
            current = Some(pair.item_x);
            rank = 0;
        }
        if rank < top_n {
            kept.push(pair);
        }
        rank += 1;
    }
    kept
}

/// Top-K view over a [`MatrixStore`], cached under `<store>/top<n>/`.
pub struct TopKExtractor<'a> {
    matrix: &'a MatrixStore,
    name: String,
}

impl<'a> TopKExtractor<'a> {
    pub fn new(matrix: &'a MatrixStore, name: &str) -> Self {
        TopKExtractor {
            matrix,
            name: name.to_string(),
        }
    }

    fn top_store(&self, top_n: usize) -> MatrixStore {
        MatrixStore::new(
            self.matrix.dir().join(format!("top{}", top_n)),
            self.matrix.n_buckets(),
        )
    }

    fn dict_path(&self, top_n: usize) -> PathBuf {
        self.top_store(top_n).dir().join("top.json")
    }

    /// Top-K pairs of one bucket; computed from the full bucket on first use.
    pub fn get_top(&self, bucket: usize, top_n: usize) -> Result<Vec<WeightedPair>> {
        let top_store = self.top_store(top_n);
        if top_store.exists(bucket)? {
            return top_store.get(bucket);
        }
        let top = top_pairs(self.matrix.get(bucket)?, top_n);
        top_store.write(bucket, &top)?;
        Ok(top)
    }

    /// Merged mapping over all buckets, cached as one JSON document.
    pub fn get_dict(&self, top_n: usize) -> Result<TopKMapping> {
        let dict_path = self.dict_path(top_n);
        if dict_path.exists() {
            info!("loading {}", dict_path.display());
            return read_mapping(&dict_path);
        }

        info!("get_dict at {}", self.name);
        let mut mapping = BTreeMap::new();
        let pb = ProgressBar::new(self.matrix.n_buckets() as u64);
        for bucket in 0..self.matrix.n_buckets() {
            for pair in self.get_top(bucket, top_n)? {
                mapping
                    .entry(pair.item_x)
                    .or_insert_with(Vec::new)
                    .push(pair.item_y);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        write_mapping(&dict_path, &mapping)?;
        Ok(mapping.into_iter().collect())
    }
}

/// Writes the mapping as `{"item_x": [item_y, ...]}` through a temporary file.
pub fn write_mapping(path: &Path, mapping: &BTreeMap<ItemId, Vec<ItemId>>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = temporary_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer(&mut writer, mapping)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a mapping written by [`write_mapping`]; string keys become item ids again.
pub fn read_mapping(path: &Path) -> Result<TopKMapping> {
    if !path.exists() {
        return Err(CovisError::NotFound(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    let mapping: BTreeMap<ItemId, Vec<ItemId>> = serde_json::from_reader(reader)?;
    Ok(mapping.into_iter().collect())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn top_pairs_are_bounded_and_sorted(
            raw in proptest::collection::vec((0u32..8, 0u32..50, 0i32..100), 0..200),
            top_n in 1usize..25,
        ) {
            let pairs = raw
                .into_iter()
                .map(|(item_x, item_y, weight)| WeightedPair { item_x, item_y, weight })
                .collect();
            let top = top_pairs(pairs, top_n);
            let mut per_item: BTreeMap<ItemId, Vec<i32>> = BTreeMap::new();
            for pair in &top {
                per_item.entry(pair.item_x).or_default().push(pair.weight);
            }
            for weights in per_item.values() {
                prop_assert!(weights.len() <= top_n);
                prop_assert!(weights.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }
}
