use std::fmt;
use std::path::PathBuf;

/// Errors raised while loading events, building matrices or producing predictions.
///
/// Precondition failures (`Precheck`, `InvalidDatasetType`, `BucketOutOfRange`) are
/// fatal and never retried. `NotFound` means an artifact was read before it was
/// built; the caller should run the build path instead of recovering.
#[derive(Debug)]
pub enum CovisError {
    Precheck(String),
    InvalidDatasetType(String),
    BucketOutOfRange { index: usize, n_buckets: usize },
    NotFound(PathBuf),
    Parse { line: usize, reason: String },
    Io(std::io::Error),
    Csv(csv::Error),
    Avro(String),
    Json(serde_json::Error),
    Config(String),
}

pub type Result<T> = std::result::Result<T, CovisError>;

impl fmt::Display for CovisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovisError::Precheck(reason) => write!(f, "precheck failed: {}", reason),
            CovisError::InvalidDatasetType(name) => write!(
                f,
                "invalid dataset type '{}', expected 'validation' or 'test'",
                name
            ),
            CovisError::BucketOutOfRange { index, n_buckets } => write!(
                f,
                "bucket index {} out of range, matrix has {} buckets",
                index, n_buckets
            ),
            CovisError::NotFound(path) => write!(f, "artifact not found: {}", path.display()),
            CovisError::Parse { line, reason } => {
                write!(f, "unable to parse input at line {}: {}", line, reason)
            }
            CovisError::Io(err) => write!(f, "io error: {}", err),
            CovisError::Csv(err) => write!(f, "csv error: {}", err),
            CovisError::Avro(err) => write!(f, "avro error: {}", err),
            CovisError::Json(err) => write!(f, "json error: {}", err),
            CovisError::Config(err) => write!(f, "configuration error: {}", err),
        }
    }
}

impl std::error::Error for CovisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CovisError::Io(err) => Some(err),
            CovisError::Csv(err) => Some(err),
            CovisError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CovisError {
    fn from(err: std::io::Error) -> Self {
        CovisError::Io(err)
    }
}

impl From<csv::Error> for CovisError {
    fn from(err: csv::Error) -> Self {
        CovisError::Csv(err)
    }
}

impl From<avro_rs::Error> for CovisError {
    fn from(err: avro_rs::Error) -> Self {
        CovisError::Avro(err.to_string())
    }
}

impl From<serde_json::Error> for CovisError {
    fn from(err: serde_json::Error) -> Self {
        CovisError::Json(err)
    }
}

impl From<justconfig::error::ConfigError> for CovisError {
    fn from(err: justconfig::error::ConfigError) -> Self {
        CovisError::Config(format!("{:?}", err))
    }
}

impl From<justconfig::sources::text::Error> for CovisError {
    fn from(err: justconfig::sources::text::Error) -> Self {
        CovisError::Config(err.to_string())
    }
}
