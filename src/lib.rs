pub mod config;
pub mod data;
pub mod engine;
pub mod logging;
pub mod metrics;
