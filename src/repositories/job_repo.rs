use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamp};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use rand::Rng;
use tracing::warn;

use crate::db::AsyncDbPool;
use crate::error::{DatabaseErrorConverter, Error, Result};
use crate::jobs::models::JobData;
use crate::jobs::types::JobStatus;
use crate::repositories::pool_error;
use crate::schema::job_data;

pub(crate) const TIMED_OUT_RESULT: &str = "job timed out";

/// Claims up to `$2` due rows in one statement: the CTE locks them, the
/// update flips them to `running` with a fresh nonce, and `RETURNING`
/// hands the claimed rows back. Concurrent workers serialize on the row
/// locks, so no row is returned to two callers.
const ACQUIRE_JOBS_SQL: &str = r#"WITH to_run AS (
    SELECT id FROM "job_data"
    WHERE "status" = 'scheduled' AND "run_at" < (NOW() AT TIME ZONE 'utc')
    LIMIT $2
    FOR UPDATE
)
UPDATE "job_data" j
SET "status" = 'running', "updated_at" = (NOW() AT TIME ZONE 'utc'), "nonce" = $1
FROM to_run
WHERE j.id = to_run.id
RETURNING j.*"#;

/// Reaper statement: fails `running` rows that have not been touched since
/// the cutoff, again rewriting the nonce so a late worker's result write
/// cannot revert them.
const MARK_INCOMPLETE_SQL: &str = r#"WITH stuck AS (
    SELECT id FROM "job_data"
    WHERE "status" = 'running' AND "updated_at" < $1
    FOR UPDATE
)
UPDATE "job_data" j
SET "status" = 'failed', "updated_at" = (NOW() AT TIME ZONE 'utc'), "result" = $2, "nonce" = $3
FROM stuck
WHERE j.id = stuck.id
RETURNING j.*"#;

#[derive(Clone)]
pub struct JobRepository {
    pool: AsyncDbPool,
}

impl JobRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    pub async fn insert_jobs(&self, jobs: &[JobData]) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        insert_jobs(&mut conn, jobs).await
    }

    /// Atomically claims up to `limit` due jobs for this worker.
    pub async fn acquire_jobs_to_run(&self, limit: i64) -> Result<Vec<JobData>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let nonce = fresh_nonce();
        let jobs: Vec<JobData> = diesel::sql_query(ACQUIRE_JOBS_SQL)
            .bind::<BigInt, _>(nonce)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert(e, "acquire jobs to run"))?;

        if jobs.len() as i64 == limit {
            // The worker may be under-scaled if every batch comes back full.
            warn!("full batch of jobs acquired");
        }
        Ok(jobs)
    }

    /// Fails `running` jobs whose `updated_at` is older than `job_timeout`
    /// and returns the reaped rows.
    pub async fn mark_incomplete_jobs(&self, job_timeout: Duration) -> Result<Vec<JobData>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let cutoff = Utc::now().naive_utc()
            - chrono::Duration::from_std(job_timeout)
                .map_err(|_| Error::validation(format!("job timeout out of range: {job_timeout:?}")))?;

        diesel::sql_query(MARK_INCOMPLETE_SQL)
            .bind::<Timestamp, _>(cutoff)
            .bind::<Text, _>(TIMED_OUT_RESULT)
            .bind::<BigInt, _>(fresh_nonce())
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert(e, "mark incomplete jobs"))
    }

    /// Persists the outcome of an execution, but only while the row still
    /// carries this worker's acquisition nonce. Returns false when the row
    /// was reaped or re-claimed in the meantime and the write was skipped.
    pub async fn write_job_result(
        &self,
        job_id: &str,
        nonce: i64,
        status: JobStatus,
        result: &str,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let updated = diesel::update(
            job_data::table
                .filter(job_data::id.eq(job_id))
                .filter(job_data::nonce.eq(nonce)),
        )
        .set((
            job_data::status.eq(status),
            job_data::result.eq(result),
            job_data::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert(e, "write job result"))?;

        Ok(updated == 1)
    }

    pub async fn get_job(&self, tenant_id: Option<&str>, job_id: &str) -> Result<JobData> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let mut query = job_data::table
            .into_boxed()
            .filter(job_data::id.eq(job_id));
        if let Some(tenant_id) = tenant_id {
            query = query.filter(job_data::tenant_id.eq(tenant_id));
        }

        query.first(&mut conn).await.map_err(|e| match e {
            diesel::result::Error::NotFound => Error::NotFound {
                entity: "job".to_string(),
                field: "id".to_string(),
                value: job_id.to_string(),
            },
            other => DatabaseErrorConverter::convert(other, "get job"),
        })
    }

    /// Jobs with `start <= run_at < end`, filtered by tenant when present.
    pub async fn list_jobs(
        &self,
        tenant_id: Option<&str>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<JobData>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let mut query = job_data::table
            .into_boxed()
            .filter(job_data::run_at.ge(start))
            .filter(job_data::run_at.lt(end));
        if let Some(tenant_id) = tenant_id {
            query = query.filter(job_data::tenant_id.eq(tenant_id));
        }

        query
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert(e, "list jobs"))
    }
}

fn fresh_nonce() -> i64 {
    rand::rng().random_range(0..i64::MAX)
}

pub(crate) async fn insert_jobs(conn: &mut AsyncPgConnection, jobs: &[JobData]) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    diesel::insert_into(job_data::table)
        .values(jobs)
        .execute(conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert(e, "insert jobs"))?;
    Ok(())
}

/// Deletes jobs for a trigger that have not started running yet.
pub(crate) async fn delete_scheduled_jobs_for_trigger(
    conn: &mut AsyncPgConnection,
    trigger_id: &str,
) -> Result<()> {
    diesel::delete(
        job_data::table
            .filter(job_data::trigger_id.eq(trigger_id))
            .filter(job_data::status.eq(JobStatus::Scheduled)),
    )
    .execute(conn)
    .await
    .map_err(|e| DatabaseErrorConverter::convert_delete(e, "delete scheduled jobs for trigger"))?;
    Ok(())
}
