//! Merges several submissions into one, by weighted voting or rank weighting.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use hashbrown::{HashMap, HashSet};
use tracing::info;

use crate::errors::{CovisError, Result};
use crate::io::{read_submission, EventType, ItemId, SubmissionRow};
use crate::suggest::MAX_CANDIDATES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsembleType {
    Voting,
    RankWeighting,
}

impl fmt::Display for EnsembleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsembleType::Voting => f.write_str("voting"),
            EnsembleType::RankWeighting => f.write_str("rank-weighting"),
        }
    }
}

impl FromStr for EnsembleType {
    type Err = CovisError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "voting" => Ok(EnsembleType::Voting),
            "rank-weighting" => Ok(EnsembleType::RankWeighting),
            other => Err(CovisError::Precheck(format!(
                "unknown ensemble type '{}', expected 'voting' or 'rank-weighting'",
                other
            ))),
        }
    }
}

/// A submission as ordered labels per session_type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Submission {
    pub rows: Vec<SubmissionRow>,
}

impl Submission {
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Submission> {
        let rows = read_submission(path.as_ref())?;
        info!(rows = rows.len(), "read submission {}", path.as_ref().display());
        Ok(Submission { rows })
    }

    /// Exploded `(session_type, item)` pairs in label order.
    pub fn explode(&self) -> impl Iterator<Item = (&str, ItemId)> + '_ {
        self.rows.iter().flat_map(|row| {
            row.labels
                .iter()
                .map(move |item| (row.session_type.as_str(), *item))
        })
    }

    fn max_labels(&self) -> usize {
        self.rows.iter().map(|row| row.labels.len()).max().unwrap_or(0)
    }
}

/// Combines submissions label by label.
///
/// With `n_top`, only the first `n_top` labels per session_type of each submission
/// take part. Voting scores each label with its submission's weight; rank weighting
/// scores the k-th label with `max_count - k * weight`. Scores are summed over
/// submissions and the 20 best labels are kept, ties in order of first appearance.
pub fn ensemble(
    submissions: &[Submission],
    weights: Option<&[f64]>,
    ensemble_type: EnsembleType,
    n_top: Option<usize>,
) -> Result<Vec<SubmissionRow>> {
    let weights = match weights {
        Some(weights) if weights.len() != submissions.len() => {
            return Err(CovisError::Precheck(format!(
                "{} weights given for {} submissions",
                weights.len(),
                submissions.len()
            )))
        }
        Some(weights) => weights.to_vec(),
        None => vec![1.0; submissions.len()],
    };
    let max_count = submissions
        .iter()
        .map(Submission::max_labels)
        .max()
        .unwrap_or(0) as f64;

    let mut session_types: Vec<&str> = Vec::new();
    let mut scores: HashMap<&str, Vec<(ItemId, f64)>> = HashMap::new();
    for (submission, weight) in submissions.iter().zip(weights.iter()) {
        for row in &submission.rows {
            let labels = match n_top {
                Some(n_top) => &row.labels[..row.labels.len().min(n_top)],
                None => &row.labels[..],
            };
            let entry = scores.entry(row.session_type.as_str()).or_insert_with(|| {
                session_types.push(row.session_type.as_str());
                Vec::new()
            });
            for (position, item) in labels.iter().enumerate() {
                let score = match ensemble_type {
                    EnsembleType::Voting => *weight,
                    EnsembleType::RankWeighting => max_count - (position + 1) as f64 * weight,
                };
                match entry.iter_mut().find(|(label, _)| label == item) {
                    Some((_, total)) => *total += score,
                    None => entry.push((*item, score)),
                }
            }
        }
    }

    let mut rows = Vec::with_capacity(session_types.len());
    for session_type in session_types {
        let mut ranked = scores.remove(&session_type).unwrap_or_default();
        // stable sort keeps first appearance among equal scores
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        rows.push(SubmissionRow {
            session_type: session_type.to_string(),
            labels: ranked
                .into_iter()
                .take(MAX_CANDIDATES)
                .map(|(item, _)| item)
                .collect(),
        });
    }
    Ok(rows)
}

/// Replaces the rows of one event type in `base` by the rows of that type in `to_add`.
pub fn replace_type(
    base: &Submission,
    to_add: &Submission,
    event_type: EventType,
) -> Result<Vec<SubmissionRow>> {
    let suffix = format!("_{}", event_type);
    let mut rows: Vec<SubmissionRow> = base
        .rows
        .iter()
        .filter(|row| !row.session_type.ends_with(&suffix))
        .cloned()
        .collect();
    rows.extend(
        to_add
            .rows
            .iter()
            .filter(|row| row.session_type.ends_with(&suffix))
            .cloned(),
    );
    if rows.len() != base.rows.len() {
        return Err(CovisError::Precheck(format!(
            "replacing {} changes the number of rows from {} to {}",
            event_type,
            base.rows.len(),
            rows.len()
        )));
    }
    let qty_unique = rows
        .iter()
        .map(|row| row.session_type.as_str())
        .collect::<HashSet<&str>>()
        .len();
    if qty_unique != rows.len() {
        return Err(CovisError::Precheck(String::from(
            "combined submission has duplicate session_type rows",
        )));
    }
    Ok(rows)
}

#[cfg(test)]
mod ensemble_test {
    use super::*;

    fn submission(rows: Vec<(&str, Vec<ItemId>)>) -> Submission {
        Submission {
            rows: rows
                .into_iter()
                .map(|(session_type, labels)| SubmissionRow {
                    session_type: session_type.to_string(),
                    labels,
                })
                .collect(),
        }
    }

    #[test]
    fn should_sum_weighted_votes() {
        let subs = vec![
            submission(vec![("1_clicks", vec![1, 2, 3])]),
            submission(vec![("1_clicks", vec![3, 4]), ("2_clicks", vec![9])]),
        ];
        let rows = ensemble(&subs, Some(&[1.0, 2.5][..]), EnsembleType::Voting, None).unwrap();
        assert_eq!(2, rows.len());
        assert_eq!("1_clicks", rows[0].session_type);
        assert_eq!(vec![3, 4, 1, 2], rows[0].labels);
        assert_eq!(vec![9], rows[1].labels);
        assert_eq!(
            vec![("1_clicks", 3), ("1_clicks", 4), ("2_clicks", 9)],
            subs[1].explode().collect::<Vec<_>>()
        );
    }

    #[test]
    fn should_favour_high_ranks() {
        let subs = vec![
            submission(vec![("1_orders", vec![1, 2, 3])]),
            submission(vec![("1_orders", vec![3, 2])]),
        ];
        // max_count 3: first sub scores 2, 1, 0; second 2, 1
        let rows = ensemble(&subs, None, EnsembleType::RankWeighting, None).unwrap();
        assert_eq!(vec![1, 2, 3], rows[0].labels);
        let top_one = ensemble(&subs, None, EnsembleType::RankWeighting, Some(1)).unwrap();
        assert_eq!(vec![1, 3], top_one[0].labels);
    }

    #[test]
    fn should_reject_weight_count_mismatch() {
        let subs = vec![submission(vec![("1_clicks", vec![1])])];
        assert!(matches!(
            ensemble(&subs, Some(&[1.0, 1.0][..]), EnsembleType::Voting, None),
            Err(CovisError::Precheck(_))
        ));
        assert!("majority".parse::<EnsembleType>().is_err());
        assert_eq!(EnsembleType::RankWeighting, "rank-weighting".parse().unwrap());
    }

    #[test]
    fn should_replace_rows_of_one_type() {
        let base = submission(vec![("1_clicks", vec![1]), ("1_orders", vec![2])]);
        let to_add = submission(vec![("1_clicks", vec![5]), ("1_orders", vec![6])]);
        let rows = replace_type(&base, &to_add, EventType::Orders).unwrap();
        assert_eq!(vec![1], rows[0].labels);
        assert_eq!(vec![6], rows[1].labels);

        let partial = submission(vec![("1_clicks", vec![5])]);
        assert!(replace_type(&base, &partial, EventType::Orders).is_err());

        let duplicated = submission(vec![("1_clicks", vec![1]), ("1_clicks", vec![2])]);
        assert!(matches!(
            replace_type(&duplicated, &partial, EventType::Orders),
            Err(CovisError::Precheck(_))
        ));
    }
}
