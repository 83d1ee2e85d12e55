pub mod models;
pub mod repository;
pub mod service;
pub mod cache;
pub mod ingest;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod bootstrap;

pub use config::Config;
pub use error::{Error, Result};

// Global server start time for uptime calculation
use once_cell::sync::Lazy;
use std::time::Instant;

pub static SERVER_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
