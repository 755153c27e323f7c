use std::fs;

use anyhow::Result;
use tracing::info;

use covisit::config::AppConfig;
use covisit::covisitation::standard::StandardMatrix;
use covisit::covisitation::CoVisitationMatrix;
use covisit::dataframeutils::EventTableStats;
use covisit::io::load_events;
use covisit::logging::init_logging;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_default();
    let config = AppConfig::new(&config_path)?;
    init_logging(&config.log.level);
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.predict.num_workers)
        .build_global()?;

    let train = load_events(&config.data.train_path, &config.data.tidy_cache_dir)?;
    EventTableStats::from_table("train", &train);

    fs::create_dir_all(&config.matrix.cache_dir)?;
    for kind in StandardMatrix::ALL {
        let spec = kind.spec(&train, config.matrix.n_buckets, config.matrix.max_memory_gb)?;
        let matrix = CoVisitationMatrix::new(&train, kind.name(), &config.matrix.cache_dir, spec)?;
        let qty_built = matrix.make(kind.max_time_delta())?;
        let mapping = matrix.get_dict(config.matrix.top_n)?;
        info!(
            matrix = kind.name(),
            buckets_built = qty_built,
            items = mapping.len(),
            "matrix ready"
        );
    }
    Ok(())
}
