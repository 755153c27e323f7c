pub mod config;
pub mod config_processors;
pub mod covisitation;
pub mod dataframeutils;
pub mod ensemble;
pub mod errors;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod predict;
pub mod stopwatch;
pub mod suggest;

pub use covisitation::{CoVisitationMatrix, MatrixSpec, WeightedPair};
pub use dataframeutils::EventTable;
pub use errors::{CovisError, Result};
