use anyhow::Result;
use tracing::info;

use covisit::config::AppConfig;
use covisit::dataframeutils::EventTableStats;
use covisit::io::{load_events, read_test_labels, write_submission};
use covisit::logging::init_logging;
use covisit::metrics::evaluation_reporter::EvaluationReporter;
use covisit::predict::{get_predictions, CandidateMappings};
use covisit::suggest::MAX_CANDIDATES;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_default();
    let config = AppConfig::new(&config_path)?;
    init_logging(&config.log.level);
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.predict.num_workers)
        .build_global()?;

    let train = load_events(&config.data.train_path, &config.data.tidy_cache_dir)?;
    EventTableStats::from_table("train", &train);
    let target = load_events(&config.data.target_path, &config.data.tidy_cache_dir)?;
    EventTableStats::from_table("target", &target);

    let mappings = CandidateMappings::build(
        &train,
        &config.matrix.cache_dir,
        config.matrix.n_buckets,
        config.matrix.max_memory_gb,
        config.matrix.top_n,
    )?;
    let rows = get_predictions(
        config.predict.dataset_type,
        &target,
        &mappings,
        &config.matrix.cache_dir,
    )?;
    write_submission(&config.predict.out_path, &rows)?;
    info!(rows = rows.len(), "wrote {}", config.predict.out_path);

    if let Some(labels_path) = &config.data.labels_path {
        let labels = read_test_labels(labels_path)?;
        let mut reporter = EvaluationReporter::new(MAX_CANDIDATES);
        reporter.add_submission(&rows, &labels);
        info!("{}: {}", reporter.get_name(), reporter.result());
    }
    Ok(())
}
