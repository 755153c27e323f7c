use crate::covisitation::aggregate::JoinedBatch;
use crate::errors::{CovisError, Result};
use crate::io::{EventType, Timestamp};

/// Weight per event type of the `y` side of a joined pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TypeWeights {
    pub clicks: f64,
    pub carts: f64,
    pub orders: f64,
}

impl TypeWeights {
    pub fn get(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::Clicks => self.clicks,
            EventType::Carts => self.carts,
            EventType::Orders => self.orders,
        }
    }
}

/// Result of evaluating a weight function on a joined batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Weight {
    /// Same weight for every row.
    Constant(f64),
    /// Weight looked up by the type of the `y` event.
    PerType(TypeWeights),
    /// One weight per row, in batch order.
    PerRow(Vec<f64>),
}

impl Weight {
    /// Expands into one weight per batch row.
    pub fn per_row(self, batch: &JoinedBatch) -> Result<Vec<f64>> {
        let weights = match self {
            Weight::Constant(value) => vec![value; batch.len()],
            Weight::PerType(type_weights) => batch
                .type_y
                .iter()
                .map(|event_type| type_weights.get(*event_type))
                .collect(),
            Weight::PerRow(weights) => {
                if weights.len() != batch.len() {
                    return Err(CovisError::Precheck(format!(
                        "weight function returned {} weights for {} rows",
                        weights.len(),
                        batch.len()
                    )));
                }
                weights
            }
        };
        if let Some(invalid) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(CovisError::Precheck(format!(
                "weights must be finite and non-negative, got {}",
                invalid
            )));
        }
        Ok(weights)
    }
}

/// Computes the weight of the rows of a joined batch.
pub trait WeightFunction: Send + Sync {
    fn weigh(&self, batch: &JoinedBatch) -> Weight;
}

impl<F> WeightFunction for F
where
    F: Fn(&JoinedBatch) -> Weight + Send + Sync,
{
    fn weigh(&self, batch: &JoinedBatch) -> Weight {
        self(batch)
    }
}

pub struct ConstantWeight(pub f64);

impl WeightFunction for ConstantWeight {
    fn weigh(&self, _batch: &JoinedBatch) -> Weight {
        Weight::Constant(self.0)
    }
}

pub struct TypeWeighted(pub TypeWeights);

impl WeightFunction for TypeWeighted {
    fn weigh(&self, _batch: &JoinedBatch) -> Weight {
        Weight::PerType(self.0)
    }
}

/// Grows linearly from 1 at `min_ts` to 4 at `max_ts`, evaluated on the `x` event.
pub struct RecencyWeighted {
    pub min_ts: Timestamp,
    pub max_ts: Timestamp,
}

impl WeightFunction for RecencyWeighted {
    fn weigh(&self, batch: &JoinedBatch) -> Weight {
        let span = (self.max_ts - self.min_ts) as f64;
        if span <= 0.0 {
            return Weight::Constant(1.0);
        }
        Weight::PerRow(
            batch
                .ts_x
                .iter()
                .map(|ts| 1.0 + 3.0 * (*ts - self.min_ts) as f64 / span)
                .collect(),
        )
    }
}

#[cfg(test)]
mod weights_test {
    use super::*;

    fn batch_with(ts_x: Vec<Timestamp>, type_y: Vec<EventType>) -> JoinedBatch {
        let n = ts_x.len();
        JoinedBatch {
            sessions: vec![0; n],
            item_x: vec![0; n],
            item_y: vec![1; n],
            ts_x: ts_x.clone(),
            ts_y: ts_x,
            type_x: type_y.clone(),
            type_y,
        }
    }

    #[test]
    fn should_expand_per_type_weights() {
        let batch = batch_with(
            vec![0, 0, 0],
            vec![EventType::Orders, EventType::Clicks, EventType::Carts],
        );
        let weights = TypeWeighted(TypeWeights {
            clicks: 1.0,
            carts: 6.0,
            orders: 3.0,
        })
        .weigh(&batch)
        .per_row(&batch)
        .unwrap();
        assert_eq!(vec![3.0, 1.0, 6.0], weights);
    }

    #[test]
    fn should_weigh_recent_events_higher() {
        let batch = batch_with(vec![100, 150, 200], vec![EventType::Clicks; 3]);
        let weights = RecencyWeighted {
            min_ts: 100,
            max_ts: 200,
        }
        .weigh(&batch)
        .per_row(&batch)
        .unwrap();
        assert_eq!(vec![1.0, 2.5, 4.0], weights);
    }

    #[test]
    fn should_reject_invalid_weights() {
        let batch = batch_with(vec![0, 0], vec![EventType::Clicks; 2]);
        assert!(Weight::Constant(-1.0).per_row(&batch).is_err());
        assert!(Weight::PerRow(vec![1.0]).per_row(&batch).is_err());
        assert!(Weight::PerRow(vec![1.0, f64::NAN]).per_row(&batch).is_err());
    }

    #[test]
    fn should_accept_closures() {
        let batch = batch_with(vec![0], vec![EventType::Carts]);
        let closure = |_: &JoinedBatch| Weight::Constant(2.0);
        assert_eq!(Weight::Constant(2.0), closure.weigh(&batch));
    }
}
