//! Async database connection pool implementation.
//!
//! Uses bb8 connection pool manager with diesel_async for PostgreSQL
//! connections, plus an embedded-migration runner for the scheduler schema.

use std::time::Duration;

use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Async connection pool type alias.
///
/// bb8::Pool internally uses Arc, so Clone is cheap (just reference count
/// increment). Structures holding AsyncDbPool can derive Clone without
/// additional Arc wrapping.
pub type AsyncDbPool = Pool<AsyncPgConnection>;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Creates an async database connection pool from configuration.
///
/// Connectivity is verified before the pool is returned, retrying up to
/// three times with a fixed five second delay; the final error is surfaced
/// if every attempt fails.
pub async fn establish_async_connection_pool(config: &DatabaseConfig) -> Result<AsyncDbPool> {
    config.validate()?;

    info!(
        db_host = %config.host,
        db_name = %config.database_name,
        "connecting to postgres"
    );

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.connection_url());
    let pool = Pool::builder()
        .connection_timeout(Duration::from_secs(10))
        .build_unchecked(manager);

    let mut attempt = 1;
    loop {
        match pool.clone().get().await {
            Ok(_) => return Ok(pool),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, "failed to connect to postgres, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::ConnectionPool {
                    source: anyhow::Error::from(e),
                });
            }
        }
    }
}

/// Runs all pending embedded migrations against the configured database.
///
/// Diesel's migration harness is synchronous, so the work runs on a
/// blocking thread with a dedicated connection.
pub async fn run_migrations(config: &DatabaseConfig) -> Result<()> {
    info!("checking database is up to date");

    let database_url = config.connection_url();
    tokio::task::spawn_blocking(move || {
        use diesel::pg::PgConnection;
        use diesel::Connection;
        use diesel_migrations::MigrationHarness;

        let mut conn = PgConnection::establish(&database_url).map_err(|e| Error::DatabaseError {
            operation: "establish connection for migrations".to_string(),
            source: anyhow::Error::from(e),
        })?;

        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::DatabaseError {
                operation: "run pending migrations".to_string(),
                source: anyhow::Error::msg(e.to_string()),
            })?;

        if applied.is_empty() {
            info!("database was up to date");
        } else {
            info!(num_migrations = applied.len(), "applied migrations");
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("migration task failed: {e}")))?
}
