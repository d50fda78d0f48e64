#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod cache;
pub mod calendar;
pub mod config;
pub mod cv;
pub mod design;
pub mod driver;
pub mod ensemble;
pub mod error;
pub mod faults;
pub mod features;
pub mod finite;
pub mod history;
pub mod learners;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod prune;
pub mod seasonal;
pub mod sequence;
pub mod table;
pub mod trainer;

pub use config::ForecastConfig;
pub use error::ForecastError;
pub use features::{BuildRequest, FeatureBuilder};
pub use history::{CsvHistory, HistorySource, InMemoryHistory, RawRecord};
pub use pipeline::Pipeline;
