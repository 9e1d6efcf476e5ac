//! Repository layer for data access operations.
//!
//! Each repository holds the pool and exposes async operations over one
//! table; operations that must be consistent across both tables run inside
//! a single transaction, composed from connection-level helpers so the
//! outermost caller owns commit and rollback.

mod job_repo;
mod trigger_repo;

pub use job_repo::JobRepository;
pub use trigger_repo::TriggerRepository;

use crate::error::Error;

pub(crate) fn pool_error<E>(error: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::ConnectionPool {
        source: anyhow::Error::from(error),
    }
}
