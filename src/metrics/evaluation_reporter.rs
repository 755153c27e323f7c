use hashbrown::HashMap;
use tracing::warn;

use crate::io::{EventType, ItemId, SessionId, SessionLabels, SubmissionRow};
use crate::metrics::recall::Recall;
use crate::metrics::SessionMetric;

/// Contribution of each event type's recall to the total score.
pub const TYPE_WEIGHTS: [(EventType, f64); 3] = [
    (EventType::Clicks, 0.10),
    (EventType::Carts, 0.30),
    (EventType::Orders, 0.60),
];

/// Per-type recall of a submission and their weighted total.
pub struct EvaluationReporter {
    clicks: Recall,
    carts: Recall,
    orders: Recall,
}

impl EvaluationReporter {
    pub fn new(length: usize) -> EvaluationReporter {
        EvaluationReporter {
            clicks: Recall::new(length),
            carts: Recall::new(length),
            orders: Recall::new(length),
        }
    }

    fn recall_mut(&mut self, event_type: EventType) -> &mut Recall {
        match event_type {
            EventType::Clicks => &mut self.clicks,
            EventType::Carts => &mut self.carts,
            EventType::Orders => &mut self.orders,
        }
    }

    pub fn recall(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::Clicks => self.clicks.result(),
            EventType::Carts => self.carts.result(),
            EventType::Orders => self.orders.result(),
        }
    }

    pub fn add(&mut self, event_type: EventType, recommendations: &[ItemId], next_items: &[ItemId]) {
        self.recall_mut(event_type).add(recommendations, next_items);
    }

    /// Scores every labelled session; a missing prediction counts as an empty list.
    pub fn add_submission(&mut self, submission: &[SubmissionRow], labels: &[SessionLabels]) {
        let mut predictions: HashMap<(SessionId, EventType), &[ItemId]> =
            HashMap::with_capacity(submission.len());
        for row in submission {
            match row.session_and_type() {
                Some(key) => {
                    predictions.insert(key, row.labels.as_slice());
                }
                None => warn!("skipping malformed session_type '{}'", row.session_type),
            }
        }
        for session_labels in labels {
            for event_type in EventType::ALL {
                let recommendations = predictions
                    .get(&(session_labels.session, event_type))
                    .copied()
                    .unwrap_or_default();
                self.add(event_type, recommendations, &session_labels.for_type(event_type));
            }
        }
    }

    pub fn total(&self) -> f64 {
        TYPE_WEIGHTS
            .iter()
            .map(|(event_type, weight)| weight * self.recall(*event_type))
            .sum()
    }

    pub fn result(&self) -> String {
        format!(
            "{:.4},{:.4},{:.4},{:.4}",
            self.clicks.result(),
            self.carts.result(),
            self.orders.result(),
            self.total()
        )
    }

    pub fn get_name(&self) -> String {
        format!(
            "clicks {},carts {},orders {},total",
            self.clicks.get_name(),
            self.carts.get_name(),
            self.orders.get_name()
        )
    }
}
