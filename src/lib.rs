pub mod aggregator;
pub mod checks;
pub mod client;
pub mod config;
pub mod config_validation;
pub mod errors;
pub mod harness;
pub mod metrics;
pub mod policy;
pub mod publish;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod stages;
pub mod thresholds;
pub mod utils;
