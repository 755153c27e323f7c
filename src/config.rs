use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;

use justconfig::item::ValueExtractor;
use justconfig::processors::Trim;
use justconfig::sources::env::Env;
use justconfig::sources::text::ConfigText;
use justconfig::ConfPath;
use justconfig::Config;

use crate::config_processors::Unquote;
use crate::covisitation::{DEFAULT_MAX_MEMORY_GB, DEFAULT_N_BUCKETS, DEFAULT_TOP_N};
use crate::errors::Result;
use crate::predict::DatasetType;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TIDY_CACHE_DIR: &str = "./cache/tidy";
const DEFAULT_MATRIX_CACHE_DIR: &str = "./cache/matrices";
const DEFAULT_OUT_PATH: &str = "./submission.csv";

pub struct AppConfig {
    pub log: LogConfig,
    pub data: DataConfig,
    pub matrix: MatrixConfig,
    pub predict: PredictConfig,
}

pub struct LogConfig {
    pub level: String,
}

pub struct DataConfig {
    pub train_path: String,
    pub target_path: String,
    pub labels_path: Option<String>,
    pub tidy_cache_dir: String,
}

pub struct MatrixConfig {
    pub cache_dir: String,
    pub n_buckets: usize,
    pub max_memory_gb: f64,
    pub top_n: usize,
}

pub struct PredictConfig {
    pub dataset_type: DatasetType,
    pub out_path: String,
    pub num_workers: usize,
}

impl AppConfig {
    /// Reads the optional config file at `config_path`, then applies environment overrides.
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<AppConfig> {
        let mut conf = Config::default();

        let config_path = config_path.as_ref();
        if let Ok(config_file) = File::open(config_path) {
            let config_text = ConfigText::new(config_file, &config_path.to_string_lossy())?;
            conf.add_source(config_text);
        }

        let config_env = Env::new(&[
            (ConfPath::from(&["data", "train_path"]), OsStr::new("TRAIN_DATA")),
            (ConfPath::from(&["data", "target_path"]), OsStr::new("TARGET_DATA")),
            (ConfPath::from(&["data", "labels_path"]), OsStr::new("LABELS_DATA")),
            (ConfPath::from(&["matrix", "cache_dir"]), OsStr::new("CACHE_DIR")),
            (ConfPath::from(&["predict", "num_workers"]), OsStr::new("NUM_WORKERS")),
            (ConfPath::from(&["log", "level"]), OsStr::new("LOG_LEVEL")),
        ]);
        conf.add_source(config_env);

        AppConfig::parse(conf)
    }

    fn parse(conf: Config) -> Result<AppConfig> {
        Ok(AppConfig {
            log: LogConfig::parse(&conf, ConfPath::from(&["log"])),
            data: DataConfig::parse(&conf, ConfPath::from(&["data"]))?,
            matrix: MatrixConfig::parse(&conf, ConfPath::from(&["matrix"])),
            predict: PredictConfig::parse(&conf, ConfPath::from(&["predict"]))?,
        })
    }
}

impl LogConfig {
    fn parse(conf: &Config, path: ConfPath) -> LogConfig {
        LogConfig {
            level: conf
                .get(path.push("level"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from(DEFAULT_LOG_LEVEL)),
        }
    }
}

impl DataConfig {
    fn parse(conf: &Config, path: ConfPath) -> Result<DataConfig> {
        Ok(DataConfig {
            train_path: conf.get(path.push("train_path")).unquote().value()?,
            target_path: conf.get(path.push("target_path")).unquote().value()?,
            labels_path: conf.get(path.push("labels_path")).unquote().value().ok(),
            tidy_cache_dir: conf
                .get(path.push("tidy_cache_dir"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from(DEFAULT_TIDY_CACHE_DIR)),
        })
    }
}

impl MatrixConfig {
    fn parse(conf: &Config, path: ConfPath) -> MatrixConfig {
        MatrixConfig {
            cache_dir: conf
                .get(path.push("cache_dir"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from(DEFAULT_MATRIX_CACHE_DIR)),
            n_buckets: conf
                .get(path.push("n_buckets"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_N_BUCKETS),
            max_memory_gb: conf
                .get(path.push("max_memory_gb"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_MAX_MEMORY_GB),
            top_n: conf
                .get(path.push("top_n"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_TOP_N),
        }
    }
}

impl PredictConfig {
    fn parse(conf: &Config, path: ConfPath) -> Result<PredictConfig> {
        let dataset_type: String = conf
            .get(path.push("dataset_type"))
            .unquote()
            .value()
            .unwrap_or_else(|_| DatasetType::Validation.name().to_string());
        Ok(PredictConfig {
            dataset_type: dataset_type.parse()?,
            out_path: conf
                .get(path.push("out_path"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from(DEFAULT_OUT_PATH)),
            num_workers: conf
                .get(path.push("num_workers"))
                .trim()
                .value()
                // Detect number of CPUs
                .unwrap_or_else(|_| sys_info::cpu_num().map(|n| n as usize).unwrap_or(1)),
        })
    }
}

#[cfg(test)]
mod config_test {
    use std::fs;

    use super::*;
    use crate::errors::CovisError;
    use crate::io::io_test::scratch_dir;

    fn parse_text(text: &str) -> Result<AppConfig> {
        let mut conf = Config::default();
        conf.add_source(ConfigText::new(text.as_bytes(), "test")?);
        AppConfig::parse(conf)
    }

    #[test]
    fn should_read_values_and_defaults() {
        let config = parse_text(
            "[data]\ntrain_path = \"train.jsonl\"\ntarget_path = test.jsonl\n\
             [matrix]\nn_buckets = 4\nmax_memory_gb = 0.5\n\
             [predict]\ndataset_type = test\nnum_workers = 3\n",
        )
        .unwrap();
        assert_eq!("train.jsonl", config.data.train_path);
        assert_eq!("test.jsonl", config.data.target_path);
        assert_eq!(None, config.data.labels_path);
        assert_eq!(4, config.matrix.n_buckets);
        assert_eq!(0.5, config.matrix.max_memory_gb);
        assert_eq!(DEFAULT_TOP_N, config.matrix.top_n);
        assert_eq!(DatasetType::Test, config.predict.dataset_type);
        assert_eq!(3, config.predict.num_workers);
        assert_eq!(DEFAULT_LOG_LEVEL, config.log.level);
    }

    #[test]
    fn should_require_data_paths() {
        assert!(matches!(
            parse_text("[data]\ntrain_path = train.jsonl\n"),
            Err(CovisError::Config(_))
        ));
    }

    #[test]
    fn should_reject_malformed_config_text() {
        match parse_text("[data]\ntrain_path = a\nnot a key value pair\n") {
            Err(CovisError::Config(reason)) => assert!(reason.contains("Missing value")),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("malformed config text was accepted"),
        }
    }

    #[test]
    fn should_reject_unknown_dataset_type() {
        assert!(matches!(
            parse_text("[data]\ntrain_path = a\ntarget_path = b\n[predict]\ndataset_type = train\n"),
            Err(CovisError::InvalidDatasetType(_))
        ));
    }

    #[test]
    fn should_read_config_file() {
        let dir = scratch_dir("config");
        let path = dir.join("covisit.conf");
        fs::write(&path, "[data]\ntrain_path = a.jsonl\ntarget_path = b.jsonl\nlabels_path = c.jsonl\n").unwrap();
        let config = AppConfig::new(&path).unwrap();
        assert_eq!(Some(String::from("c.jsonl")), config.data.labels_path);
        fs::remove_dir_all(dir).unwrap();
    }
}
