pub mod evaluation_reporter;
pub mod recall;

use crate::io::ItemId;

pub trait SessionMetric {
    fn add(&mut self, recommendations: &[ItemId], next_items: &[ItemId]);
    fn result(&self) -> f64;
    fn get_name(&self) -> String;
}
