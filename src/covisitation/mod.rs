pub mod aggregate;
pub mod partition;
pub mod store;
pub mod topk;
pub mod weights;

use std::path::Path;

use chrono::Duration;
use indicatif::ProgressBar;
use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::covisitation::aggregate::{aggregate_chunk, AggregationParams, PairAccumulator};
use crate::covisitation::partition::{gigabytes_to_bytes, Partition};
use crate::covisitation::store::MatrixStore;
use crate::covisitation::topk::{TopKExtractor, TopKMapping};
use crate::covisitation::weights::{ConstantWeight, WeightFunction};
use crate::dataframeutils::EventTable;
use crate::errors::{CovisError, Result};
use crate::io::{EventType, ItemId};
use crate::stopwatch::Stopwatch;

pub const DEFAULT_N_BUCKETS: usize = 8;
pub const DEFAULT_MAX_MEMORY_GB: f64 = 1.0;
pub const DEFAULT_TOP_N: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPair {
    pub item_x: ItemId,
    pub item_y: ItemId,
    pub weight: i32,
}

/// Build parameters of one co-visitation matrix.
pub struct MatrixSpec {
    /// Event types taking part in the join; `None` keeps all of them.
    pub types_to_use: Option<Vec<EventType>>,
    pub weight_function: Box<dyn WeightFunction>,
    pub n_buckets: usize,
    pub max_memory_gb: f64,
}

impl Default for MatrixSpec {
    fn default() -> Self {
        MatrixSpec {
            types_to_use: None,
            weight_function: Box::new(ConstantWeight(1.0)),
            n_buckets: DEFAULT_N_BUCKETS,
            max_memory_gb: DEFAULT_MAX_MEMORY_GB,
        }
    }
}

/// Build context of one named matrix over a training table.
///
/// Artifacts live under `<cache_dir>/<name>/`; see [`MatrixStore`] and [`TopKExtractor`].
pub struct CoVisitationMatrix<'a> {
    table: &'a EventTable,
    name: String,
    spec: MatrixSpec,
    partition: Partition,
    store: MatrixStore,
}

impl<'a> CoVisitationMatrix<'a> {
    pub fn new<P: AsRef<Path>>(
        table: &'a EventTable,
        name: &str,
        cache_dir: P,
        spec: MatrixSpec,
    ) -> Result<Self> {
        let max_memory_bytes = gigabytes_to_bytes(spec.max_memory_gb)?;
        let partition = Partition::new(table, spec.n_buckets, max_memory_bytes)?;
        let store = MatrixStore::new(cache_dir.as_ref().join(name), spec.n_buckets);
        info!(
            matrix = name,
            buckets = partition.n_buckets(),
            chunks = partition.n_chunks(),
            "partitioned {} events",
            table.len()
        );
        Ok(CoVisitationMatrix {
            table,
            name: name.to_string(),
            spec,
            partition,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn store(&self) -> &MatrixStore {
        &self.store
    }

    /// Builds every bucket that is not on disk yet, one bucket at a time.
    ///
    /// Returns the number of buckets that were computed in this call.
    pub fn make(&self, max_time_delta: Duration) -> Result<usize> {
        let max_time_delta_ms = max_time_delta.num_milliseconds();
        if max_time_delta_ms <= 0 {
            return Err(CovisError::Precheck(format!(
                "time window must be positive, got {} ms",
                max_time_delta_ms
            )));
        }
        let params = AggregationParams {
            types_to_use: self.spec.types_to_use.as_deref(),
            max_time_delta_ms,
            weight_function: self.spec.weight_function.as_ref(),
        };

        let n_buckets = self.partition.n_buckets();
        let mut stopwatch = Stopwatch::new();
        for bucket in 0..n_buckets {
            info!("({}/{}) split items at {}", bucket + 1, n_buckets, self.name);
            if self.store.exists(bucket)? {
                continue;
            }
            stopwatch.start();
            let item_range = self.partition.bucket_range(bucket)?;
            let mut accumulator = PairAccumulator::new();
            let pb = ProgressBar::new(self.partition.n_chunks() as u64);
            for rows in self.partition.chunk_ranges() {
                accumulator.add(aggregate_chunk(self.table, rows, &item_range, &params)?);
                pb.inc(1);
            }
            pb.finish_and_clear();
            let pairs = accumulator.finish();
            self.store.write(bucket, &pairs)?;
            stopwatch.stop(bucket);
            info!(bucket, pairs = pairs.len(), "finished bucket");
        }

        if let Some(p50) = stopwatch.get_percentile_in_micros(0.5) {
            info!(
                matrix = self.name.as_str(),
                built = stopwatch.get_n(),
                "bucket build time p50 {:.1}s, total {:.1}s",
                p50 / 1e6,
                stopwatch.total_micros() / 1e6
            );
        }
        Ok(stopwatch.get_n())
    }

    pub fn get_df(&self, bucket: usize) -> Result<Vec<WeightedPair>> {
        self.store.get(bucket)
    }

    pub fn get_top(&self, bucket: usize, top_n: usize) -> Result<Vec<WeightedPair>> {
        TopKExtractor::new(&self.store, &self.name).get_top(bucket, top_n)
    }

    pub fn get_dict(&self, top_n: usize) -> Result<TopKMapping> {
        TopKExtractor::new(&self.store, &self.name).get_dict(top_n)
    }
}

/// The three matrices used to produce predictions.
pub mod standard {
    use chrono::Duration;

    use crate::covisitation::weights::{
        ConstantWeight, RecencyWeighted, TypeWeighted, TypeWeights,
    };
    use crate::covisitation::MatrixSpec;
    use crate::dataframeutils::EventTable;
    use crate::errors::{CovisError, Result};
    use crate::io::EventType;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum StandardMatrix {
        Clicks,
        CartsOrders,
        Buy2Buy,
    }

    impl StandardMatrix {
        pub const ALL: [StandardMatrix; 3] = [
            StandardMatrix::Clicks,
            StandardMatrix::CartsOrders,
            StandardMatrix::Buy2Buy,
        ];

        pub fn name(self) -> &'static str {
            match self {
                StandardMatrix::Clicks => "clicks",
                StandardMatrix::CartsOrders => "carts_orders",
                StandardMatrix::Buy2Buy => "buy2buy",
            }
        }

        pub fn max_time_delta(self) -> Duration {
            match self {
                StandardMatrix::Buy2Buy => Duration::days(14),
                _ => Duration::days(1),
            }
        }

        pub fn spec(self, table: &EventTable, n_buckets: usize, max_memory_gb: f64) -> Result<MatrixSpec> {
            let spec = match self {
                StandardMatrix::Clicks => {
                    let (min_ts, max_ts) = table.time_span().ok_or_else(|| {
                        CovisError::Precheck(String::from("event table is empty"))
                    })?;
                    MatrixSpec {
                        weight_function: Box::new(RecencyWeighted { min_ts, max_ts }),
                        ..MatrixSpec::default()
                    }
                }
                StandardMatrix::CartsOrders => MatrixSpec {
                    weight_function: Box::new(TypeWeighted(TypeWeights {
                        clicks: 1.0,
                        carts: 6.0,
                        orders: 3.0,
                    })),
                    ..MatrixSpec::default()
                },
                StandardMatrix::Buy2Buy => MatrixSpec {
                    types_to_use: Some(vec![EventType::Carts, EventType::Orders]),
                    weight_function: Box::new(ConstantWeight(1.0)),
                    ..MatrixSpec::default()
                },
            };
            Ok(MatrixSpec {
                n_buckets,
                max_memory_gb,
                ..spec
            })
        }
    }
}
