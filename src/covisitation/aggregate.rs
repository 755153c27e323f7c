//! Staged pairwise aggregation of one (row chunk, item bucket) step.
//!
//! filter types -> self-join on session -> time window -> dedup -> weigh -> group sum.
//! Every stage is a pure function over a batch; [`aggregate_chunk`] chains them.

use std::ops::Range;

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::covisitation::weights::WeightFunction;
use crate::covisitation::WeightedPair;
use crate::dataframeutils::EventTable;
use crate::errors::Result;
use crate::io::{EventType, ItemId, SessionId, Timestamp};

pub type PairKey = (ItemId, ItemId);

/// Pairs of events sharing a session, stored column-wise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinedBatch {
    pub sessions: Vec<SessionId>,
    pub item_x: Vec<ItemId>,
    pub item_y: Vec<ItemId>,
    pub ts_x: Vec<Timestamp>,
    pub ts_y: Vec<Timestamp>,
    pub type_x: Vec<EventType>,
    pub type_y: Vec<EventType>,
}

impl JoinedBatch {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn push_pair(&mut self, table: &EventTable, row_x: usize, row_y: usize) {
        self.sessions.push(table.sessions[row_x]);
        self.item_x.push(table.items[row_x]);
        self.item_y.push(table.items[row_y]);
        self.ts_x.push(table.timestamps[row_x]);
        self.ts_y.push(table.timestamps[row_y]);
        self.type_x.push(table.types[row_x]);
        self.type_y.push(table.types[row_y]);
    }

    /// Keeps the rows for which `keep(row)` holds, preserving order.
    pub fn retain<F: FnMut(usize) -> bool>(self, mut keep: F) -> JoinedBatch {
        let mut kept = JoinedBatch::default();
        for row in 0..self.len() {
            if keep(row) {
                kept.sessions.push(self.sessions[row]);
                kept.item_x.push(self.item_x[row]);
                kept.item_y.push(self.item_y[row]);
                kept.ts_x.push(self.ts_x[row]);
                kept.ts_y.push(self.ts_y[row]);
                kept.type_x.push(self.type_x[row]);
                kept.type_y.push(self.type_y[row]);
            }
        }
        kept
    }
}

/// Rows of `rows` whose event type is allowed; all rows when no allow-list is given.
pub fn filter_types(
    table: &EventTable,
    rows: Range<usize>,
    types_to_use: Option<&[EventType]>,
) -> Vec<usize> {
    match types_to_use {
        Some(types) => rows.filter(|row| types.contains(&table.types[*row])).collect(),
        None => rows.collect(),
    }
}

/// Ordered pairs of rows sharing a session, where `item_x` lies in `item_range`.
///
/// `rows` must be grouped by session. Self-pairs (`item_x == item_y`) are not emitted.
pub fn self_join(table: &EventTable, rows: &[usize], item_range: &Range<ItemId>) -> JoinedBatch {
    let mut batch = JoinedBatch::default();
    let mut start = 0;
    while start < rows.len() {
        let session = table.sessions[rows[start]];
        let mut end = start + 1;
        while end < rows.len() && table.sessions[rows[end]] == session {
            end += 1;
        }
        let group = &rows[start..end];
        for &row_x in group {
            let item_x = table.items[row_x];
            if !item_range.contains(&item_x) {
                continue;
            }
            for &row_y in group {
                if table.items[row_y] != item_x {
                    batch.push_pair(table, row_x, row_y);
                }
            }
        }
        start = end;
    }
    batch
}

/// Keeps pairs with `|ts_x - ts_y| < max_time_delta_ms`.
pub fn restrict_time_window(batch: JoinedBatch, max_time_delta_ms: i64) -> JoinedBatch {
    let within: Vec<bool> = batch
        .ts_x
        .iter()
        .zip(batch.ts_y.iter())
        .map(|(ts_x, ts_y)| (ts_x - ts_y).abs() < max_time_delta_ms)
        .collect();
    batch.retain(|row| within[row])
}

/// Keeps the first row of every `(session, item_x, item_y)`.
pub fn deduplicate(batch: JoinedBatch) -> JoinedBatch {
    let mut seen: HashSet<(SessionId, ItemId, ItemId)> = HashSet::with_capacity(batch.len());
    let first: Vec<bool> = (0..batch.len())
        .map(|row| seen.insert((batch.sessions[row], batch.item_x[row], batch.item_y[row])))
        .collect();
    batch.retain(|row| first[row])
}

/// Sums row weights per `(item_x, item_y)`.
pub fn group_sum(batch: &JoinedBatch, weights: &[f64]) -> HashMap<PairKey, f64> {
    let mut sums: HashMap<PairKey, f64> = HashMap::with_capacity(batch.len());
    for (row, weight) in weights.iter().enumerate() {
        *sums.entry((batch.item_x[row], batch.item_y[row])).or_insert(0.0) += *weight;
    }
    sums
}

/// Parameters shared by every step of one matrix build.
pub struct AggregationParams<'a> {
    pub types_to_use: Option<&'a [EventType]>,
    pub max_time_delta_ms: i64,
    pub weight_function: &'a dyn WeightFunction,
}

/// Weighted pair sums of one row chunk restricted to one item bucket.
pub fn aggregate_chunk(
    table: &EventTable,
    rows: Range<usize>,
    item_range: &Range<ItemId>,
    params: &AggregationParams,
) -> Result<HashMap<PairKey, f64>> {
    let filtered = filter_types(table, rows, params.types_to_use);
    let joined = self_join(table, &filtered, item_range);
    let qty_joined = joined.len();
    let windowed = restrict_time_window(joined, params.max_time_delta_ms);
    let unique = deduplicate(windowed);
    let weights = params.weight_function.weigh(&unique).per_row(&unique)?;
    let sums = group_sum(&unique, &weights);
    debug!(
        rows = filtered.len(),
        joined = qty_joined,
        deduplicated = unique.len(),
        pairs = sums.len(),
        "aggregated chunk"
    );
    Ok(sums)
}

/// Running per-bucket total with outer-add semantics; missing keys count as zero.
///
/// Sums stay in floating point until [`PairAccumulator::finish`], so the result
/// does not depend on chunk order or grouping.
#[derive(Clone, Debug, Default)]
pub struct PairAccumulator {
    totals: HashMap<PairKey, f64>,
}

impl PairAccumulator {
    pub fn new() -> Self {
        PairAccumulator::default()
    }

    pub fn add(&mut self, chunk: HashMap<PairKey, f64>) {
        if self.totals.is_empty() {
            self.totals = chunk;
            return;
        }
        for (key, weight) in chunk {
            *self.totals.entry(key).or_insert(0.0) += weight;
        }
    }

    pub fn merge(mut self, other: PairAccumulator) -> PairAccumulator {
        self.add(other.totals);
        self
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Truncates the totals to integers, sorted by `(item_x, item_y)`.
    pub fn finish(self) -> Vec<WeightedPair> {
        let mut pairs: Vec<WeightedPair> = self
            .totals
            .into_iter()
            .map(|((item_x, item_y), weight)| WeightedPair {
                item_x,
                item_y,
                weight: weight.trunc() as i32,
            })
            .collect();
        pairs.sort_unstable_by_key(|pair| (pair.item_x, pair.item_y));
        pairs
    }
}

#[cfg(test)]
mod aggregate_test {
    use super::*;
    use crate::covisitation::weights::{ConstantWeight, TypeWeighted, TypeWeights};
    use crate::dataframeutils::dataframeutils_test::event;

    const HOUR_MS: i64 = 60 * 60 * 1000;
    const DAY_MS: i64 = 24 * HOUR_MS;

    fn three_item_session() -> EventTable {
        EventTable::from_events(vec![
            event(0, 1, 0, EventType::Clicks),
            event(0, 2, 10 * 60 * 1000, EventType::Clicks),
            event(0, 3, 20 * 60 * 1000, EventType::Carts),
            event(0, 2, 30 * 60 * 1000, EventType::Clicks),
            event(1, 4, 0, EventType::Clicks),
            event(2, 5, 0, EventType::Orders),
            event(2, 9, 3 * DAY_MS, EventType::Orders),
        ])
    }

    fn pairs_of(sums: &HashMap<PairKey, f64>) -> Vec<(ItemId, ItemId, f64)> {
        let mut pairs: Vec<_> = sums.iter().map(|((x, y), w)| (*x, *y, *w)).collect();
        pairs.sort_by_key(|(x, y, _)| (*x, *y));
        pairs
    }

    #[test]
    fn should_count_each_session_pair_once() {
        let table = three_item_session();
        let params = AggregationParams {
            types_to_use: None,
            max_time_delta_ms: DAY_MS,
            weight_function: &ConstantWeight(1.0),
        };
        let sums = aggregate_chunk(&table, 0..table.len(), &(0..10), &params).unwrap();
        assert_eq!(
            vec![
                (1, 2, 1.0),
                (1, 3, 1.0),
                (2, 1, 1.0),
                (2, 3, 1.0),
                (3, 1, 1.0),
                (3, 2, 1.0),
            ],
            pairs_of(&sums)
        );
    }

    #[test]
    fn should_restrict_item_x_to_bucket() {
        let table = three_item_session();
        let rows: Vec<usize> = (0..table.len()).collect();
        let batch = self_join(&table, &rows, &(2..3));
        assert!(batch.item_x.iter().all(|item| *item == 2));
        // item 2 appears twice, each pairs with 1 and 3
        assert_eq!(4, batch.len());
    }

    #[test]
    fn should_drop_pairs_outside_time_window() {
        let table = three_item_session();
        let rows: Vec<usize> = (0..table.len()).collect();
        let batch = self_join(&table, &rows, &(5..10));
        assert_eq!(2, batch.len());
        assert!(restrict_time_window(batch.clone(), DAY_MS).is_empty());
        assert_eq!(2, restrict_time_window(batch, 4 * DAY_MS).len());
    }

    #[test]
    fn should_filter_by_type_before_joining() {
        let table = three_item_session();
        let buys = [EventType::Carts, EventType::Orders];
        assert_eq!(vec![2, 5, 6], filter_types(&table, 0..table.len(), Some(&buys)));
        assert_eq!(7, filter_types(&table, 0..table.len(), None).len());
    }

    #[test]
    fn should_keep_first_duplicate() {
        let table = three_item_session();
        let rows: Vec<usize> = (0..4).collect();
        let batch = deduplicate(self_join(&table, &rows, &(0..10)));
        assert_eq!(6, batch.len());
        // (2, 1) first comes from the second row of the session
        let row = (0..batch.len())
            .find(|row| batch.item_x[*row] == 2 && batch.item_y[*row] == 1)
            .unwrap();
        assert_eq!(10 * 60 * 1000, batch.ts_x[row]);
    }

    #[test]
    fn should_weigh_by_type_of_second_event() {
        let table = three_item_session();
        let params = AggregationParams {
            types_to_use: None,
            max_time_delta_ms: DAY_MS,
            weight_function: &TypeWeighted(TypeWeights {
                clicks: 1.0,
                carts: 6.0,
                orders: 3.0,
            }),
        };
        let sums = aggregate_chunk(&table, 0..4, &(0..10), &params).unwrap();
        assert_eq!(Some(&6.0), sums.get(&(1, 3)));
        assert_eq!(Some(&1.0), sums.get(&(3, 2)));
    }

    #[test]
    fn should_outer_add_and_truncate_once() {
        let mut first = HashMap::new();
        first.insert((1, 2), 0.6);
        first.insert((1, 3), 2.0);
        let mut second = HashMap::new();
        second.insert((1, 2), 0.6);
        second.insert((4, 1), 1.0);

        let mut accumulator = PairAccumulator::new();
        accumulator.add(first);
        accumulator.add(second);
        assert_eq!(3, accumulator.len());
        assert_eq!(
            vec![
                WeightedPair { item_x: 1, item_y: 2, weight: 1 },
                WeightedPair { item_x: 1, item_y: 3, weight: 2 },
                WeightedPair { item_x: 4, item_y: 1, weight: 1 },
            ],
            accumulator.finish()
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn accumulate(chunks: &[Vec<(ItemId, ItemId, u8)>]) -> PairAccumulator {
        let mut accumulator = PairAccumulator::new();
        for chunk in chunks {
            let mut sums = HashMap::new();
            for (x, y, w) in chunk {
                *sums.entry((*x, *y)).or_insert(0.0) += f64::from(*w);
            }
            accumulator.add(sums);
        }
        accumulator
    }

    proptest! {
        #[test]
        fn accumulation_is_order_independent(
            chunks in proptest::collection::vec(
                proptest::collection::vec((0u32..6, 0u32..6, 0u8..10), 0..20),
                1..6,
            ),
        ) {
            let forward = accumulate(&chunks).finish();
            let mut reversed_chunks = chunks.clone();
            reversed_chunks.reverse();
            let backward = accumulate(&reversed_chunks).finish();
            prop_assert_eq!(&forward, &backward);

            let split = chunks.len() / 2;
            let grouped = accumulate(&chunks[..split]).merge(accumulate(&chunks[split..])).finish();
            prop_assert_eq!(forward, grouped);
        }
    }
}
