use std::time::Instant;

use tdigest::TDigest;

/// Wall-clock duration of one numbered step, in microseconds.
pub type StepDurationMicros = (usize, f64);

/// Collects the duration of repeated steps, e.g. one entry per matrix bucket.
#[derive(Clone)]
pub struct Stopwatch {
    start_time: Instant,
    step_durations: Vec<StepDurationMicros>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Stopwatch {
        Stopwatch {
            start_time: Instant::now(),
            step_durations: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn stop(&mut self, step: usize) {
        let duration_as_micros = self.start_time.elapsed().as_micros() as f64;
        self.step_durations.push((step, duration_as_micros));
    }

    pub fn get_n(&self) -> usize {
        self.step_durations.len()
    }

    pub fn total_micros(&self) -> f64 {
        self.step_durations.iter().map(|(_, micros)| micros).sum()
    }

    /// Estimated duration quantile, `q` in `[0, 1]`. `None` before the first step.
    pub fn get_percentile_in_micros(&self, q: f64) -> Option<f64> {
        if self.step_durations.is_empty() {
            return None;
        }
        let durations = self
            .step_durations
            .iter()
            .map(|(_, micros)| *micros)
            .collect();
        let digest = TDigest::new_with_size(100).merge_unsorted(durations);
        Some(digest.estimate_quantile(q))
    }

    pub fn get_raw_durations(&self) -> &[StepDurationMicros] {
        &self.step_durations
    }
}

#[cfg(test)]
mod stopwatch_test {
    use super::*;

    #[test]
    fn should_record_each_step() {
        let mut stopwatch = Stopwatch::new();
        assert_eq!(None, stopwatch.get_percentile_in_micros(0.5));
        for step in 0..3 {
            stopwatch.start();
            stopwatch.stop(step);
        }
        assert_eq!(3, stopwatch.get_n());
        assert_eq!(vec![0, 1, 2], stopwatch.get_raw_durations().iter().map(|(step, _)| *step).collect::<Vec<_>>());
        assert!(stopwatch.get_percentile_in_micros(0.5).unwrap() >= 0.0);
        assert!(stopwatch.total_micros() >= 0.0);
    }
}
