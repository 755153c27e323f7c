//! Splits the event log into memory-bounded row chunks and item-id buckets.
//!
//! A per-session self-join costs `O(events^2)`, so the cumulative sum of squared
//! session sizes approximates the worst-case join memory of a run of sessions.
//! A new row chunk starts whenever that estimate crosses another multiple of
//! the per-step budget. Chunk boundaries always fall on session starts.

use std::ops::Range;

use crate::dataframeutils::{EventTable, EVENT_ROW_BYTES};
use crate::errors::{CovisError, Result};
use crate::io::ItemId;

#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    /// `n_buckets + 1` item ids; bucket `i` is `[boundaries[i], boundaries[i + 1])`.
    pub item_boundaries: Vec<ItemId>,
    /// Row offsets starting at 0 and ending at the table length.
    pub row_boundaries: Vec<usize>,
}

impl Partition {
    /// Runs the dense-id and session-order prechecks, then partitions the table.
    pub fn new(table: &EventTable, n_buckets: usize, max_memory_bytes: u64) -> Result<Partition> {
        let n_items = table.precheck_dense_items()?;
        table.precheck_sorted_sessions()?;
        Ok(Partition {
            item_boundaries: item_bucket_boundaries(n_items, n_buckets)?,
            row_boundaries: row_chunk_boundaries(table, max_memory_bytes)?,
        })
    }

    pub fn n_buckets(&self) -> usize {
        self.item_boundaries.len() - 1
    }

    pub fn n_chunks(&self) -> usize {
        self.row_boundaries.len() - 1
    }

    pub fn bucket_range(&self, bucket: usize) -> Result<Range<ItemId>> {
        if bucket >= self.n_buckets() {
            return Err(CovisError::BucketOutOfRange {
                index: bucket,
                n_buckets: self.n_buckets(),
            });
        }
        Ok(self.item_boundaries[bucket]..self.item_boundaries[bucket + 1])
    }

    pub fn chunk_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.row_boundaries
            .windows(2)
            .map(|bounds| bounds[0]..bounds[1])
    }
}

/// Linearly spaced bucket boundaries over `[0, n_items]`: `floor(i * N / n_buckets)`.
pub fn item_bucket_boundaries(n_items: usize, n_buckets: usize) -> Result<Vec<ItemId>> {
    if n_buckets == 0 {
        return Err(CovisError::Precheck(String::from(
            "number of item buckets must be positive",
        )));
    }
    if n_items > ItemId::MAX as usize + 1 {
        return Err(CovisError::Precheck(format!(
            "{} items do not fit the item id type",
            n_items
        )));
    }
    Ok((0..=n_buckets)
        .map(|i| ((i as u64 * n_items as u64) / n_buckets as u64) as ItemId)
        .collect())
}

/// Row offsets at which a new chunk starts, followed by the table length.
///
/// Requires the table to be grouped by session.
pub fn row_chunk_boundaries(table: &EventTable, max_memory_bytes: u64) -> Result<Vec<usize>> {
    if max_memory_bytes == 0 {
        return Err(CovisError::Precheck(String::from(
            "memory budget per step must be positive",
        )));
    }
    let starts = table.session_start_indices();

    let mut boundaries = Vec::new();
    let mut cumulative_cost = 0_u128;
    let mut last_level = None;
    for (position, window) in starts.windows(2).enumerate() {
        let session_size = (window[1] - window[0]) as u128;
        cumulative_cost += session_size * session_size;
        let level = cumulative_cost * u128::from(EVENT_ROW_BYTES) / u128::from(max_memory_bytes);
        if last_level != Some(level) {
            boundaries.push(starts[position]);
            last_level = Some(level);
        }
    }
    if boundaries.is_empty() && !table.is_empty() {
        boundaries.push(0);
    }
    boundaries.push(table.len());
    Ok(boundaries)
}

/// Converts a budget in gigabytes to bytes.
pub fn gigabytes_to_bytes(gigabytes: f64) -> Result<u64> {
    if !gigabytes.is_finite() || gigabytes <= 0.0 {
        return Err(CovisError::Precheck(format!(
            "memory budget must be a positive number of gigabytes, got {}",
            gigabytes
        )));
    }
    Ok((gigabytes * 1e9) as u64)
}
