use anyhow::{anyhow, Result};

use covisit::io::{read_submission, read_test_labels, EventType};
use covisit::logging::init_logging;
use covisit::metrics::evaluation_reporter::EvaluationReporter;
use covisit::suggest::MAX_CANDIDATES;

fn main() -> Result<()> {
    // Scores a submission csv against held-out labels, like the competition validator.
    init_logging("");
    let predictions_file = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("predictions csv not specified"))?;
    let labels_file = std::env::args()
        .nth(2)
        .ok_or_else(|| anyhow!("test labels jsonl not specified"))?;

    let submission = read_submission(&predictions_file)?;
    let labels = read_test_labels(&labels_file)?;

    let mut reporter = EvaluationReporter::new(MAX_CANDIDATES);
    reporter.add_submission(&submission, &labels);

    for event_type in EventType::ALL {
        println!("{}: {:.4}", event_type, reporter.recall(event_type));
    }
    println!("total: {:.4}", reporter.total());
    Ok(())
}
