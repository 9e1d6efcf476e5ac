use thiserror::Error as ThisError;

use crate::error::DatabaseErrorConverter;

/// Error type covering every failure the scheduler can surface.
///
/// Database errors are classified by violation kind (uniqueness conflict,
/// foreign key, missing row) so callers can react to the expected races
/// without string matching; everything else keeps the driver cause attached.
#[derive(ThisError, Debug)]
pub enum Error {
    /// No handler was registered for the job type found on an acquired row
    #[error("unregistered job type: {job_type}")]
    UnregisteredJobType { job_type: String },

    /// No trigger type with this tag is known to the trigger registry
    #[error("invalid trigger type: {trigger_type}")]
    InvalidTriggerType { trigger_type: String },

    /// The trigger has no upcoming fire times
    #[error("{0}")]
    TriggerExpired(String),

    /// Unique constraint violation, or a lost watermark race
    #[error("uniqueness conflict: {message}")]
    Conflict { message: String },

    /// Foreign key violation on insert or update
    #[error("invalid foreign key")]
    InvalidForeignKey {
        #[source]
        source: anyhow::Error,
    },

    /// Foreign key violation while deleting a row
    #[error("delete violates foreign key")]
    DeleteViolatesForeignKey {
        #[source]
        source: anyhow::Error,
    },

    /// Single-row lookup found nothing
    #[error("resource not found: {entity} with {field}={value}")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },

    /// The row cannot be updated as requested
    #[error("row is not updateable")]
    NotUpdateable,

    /// Payload or trigger construction failed validation
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Any other database failure, with the driver cause attached
    #[error("database operation failed: {operation}")]
    DatabaseError {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error
    #[error("configuration error")]
    Configuration(#[from] crate::config::ConfigError),

    /// Payload or trigger body (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal failure (includes recovered handler panics)
    #[error("internal scheduler error: {message}")]
    InternalSchedulerError { message: String },
}

impl Error {
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalSchedulerError {
            message: message.into(),
        }
    }

    /// True for the expected lost-race outcome of a conditional update.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<diesel::result::Error> for Error {
    fn from(error: diesel::result::Error) -> Self {
        DatabaseErrorConverter::convert(error, "database operation")
    }
}

/// Type alias for Result with the scheduler error type
pub type Result<T> = std::result::Result<T, Error>;
