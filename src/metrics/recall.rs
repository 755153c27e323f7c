use std::cmp;

use hashbrown::HashSet;

use crate::io::ItemId;
use crate::metrics::SessionMetric;

/// Recall over all sessions: total hits divided by the total number of
/// reachable ground-truth items, where a session can reach at most `length`.
pub struct Recall {
    qty_hits: usize,
    qty_reachable: usize,
    length: usize,
}

impl Recall {
    /// # Arguments
    ///
    /// * `length` - the length aka 'k' that will be used for evaluation.
    pub fn new(length: usize) -> Recall {
        Recall {
            qty_hits: 0,
            qty_reachable: 0,
            length,
        }
    }
}

impl SessionMetric for Recall {
    /// Sessions without ground truth do not count.
    fn add(&mut self, recommendations: &[ItemId], next_items: &[ItemId]) {
        let unique_next_items: HashSet<&ItemId> = next_items.iter().collect();
        if unique_next_items.is_empty() {
            return;
        }
        let top_recos: HashSet<&ItemId> = recommendations.iter().take(self.length).collect();
        self.qty_hits += top_recos.intersection(&unique_next_items).count();
        self.qty_reachable += cmp::min(unique_next_items.len(), self.length);
    }

    fn result(&self) -> f64 {
        if self.qty_reachable > 0 {
            self.qty_hits as f64 / self.qty_reachable as f64
        } else {
            0.0
        }
    }

    fn get_name(&self) -> String {
        format!("Recall@{}", self.length)
    }
}

#[cfg(test)]
mod recall_test {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn should_calculate_recall() {
        let mut under_test = Recall::new(20);
        let recommendations: Vec<ItemId> = (1..=24).collect();
        under_test.add(&recommendations, &[3, 55, 3, 4]);
        assert!(approx_eq!(f64, 2.0 / 3.0, under_test.result(), ulps = 2));
        assert_eq!("Recall@20", under_test.get_name());
    }

    #[test]
    fn should_sum_hits_across_sessions() {
        let mut under_test = Recall::new(2);
        under_test.add(&[1, 2, 3], &[3, 4, 5]);
        under_test.add(&[7], &[7]);
        under_test.add(&[8], &[]);
        // 0 of 2 reachable, then 1 of 1
        assert!(approx_eq!(f64, 1.0 / 3.0, under_test.result(), ulps = 2));
    }

    #[test]
    fn should_be_zero_without_ground_truth() {
        let under_test = Recall::new(20);
        assert_eq!(0.0, under_test.result());
    }
}
