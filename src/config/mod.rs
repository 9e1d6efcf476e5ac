//! Configuration management for jobrun
//!
//! Database settings are read from `JOBRUN_DB_*` environment variables with
//! serde-supplied defaults, so a worker can be pointed at a database with
//! nothing but its environment.

pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::DatabaseConfig;
