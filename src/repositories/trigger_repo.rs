use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use scoped_futures::ScopedFutureExt;
use tracing::info;

use crate::db::AsyncDbPool;
use crate::error::{DatabaseErrorConverter, Error, Result};
use crate::jobs::models::{JobData, JobTrigger};
use crate::repositories::{job_repo, pool_error};
use crate::schema::trigger;

#[derive(Clone)]
pub struct TriggerRepository {
    pool: AsyncDbPool,
}

impl TriggerRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    /// Inserts a trigger row; an id collision surfaces as a conflict.
    pub async fn insert_trigger(&self, trigger_row: &JobTrigger) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        insert_trigger(&mut conn, trigger_row).await
    }

    /// Inserts a trigger and its first jobs in one transaction.
    pub async fn insert_trigger_with_jobs(
        &self,
        trigger_row: &JobTrigger,
        jobs: &[JobData],
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, Error, _>(|conn| {
            async move {
                insert_trigger(conn, trigger_row).await?;
                job_repo::insert_jobs(conn, jobs).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Idempotent registration of a keyed trigger.
    ///
    /// A missing row is inserted together with `jobs`. An identical row
    /// (same trigger type, trigger body, job type, and job args) is left
    /// alone, preserving already-materialized future jobs. A differing row
    /// is replaced: its still-scheduled jobs are deleted and the trigger is
    /// updated in place.
    pub async fn upsert_trigger_with_jobs(
        &self,
        trigger_row: &JobTrigger,
        jobs: &[JobData],
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, Error, _>(|conn| {
            async move {
                let existing: Option<JobTrigger> = trigger::table
                    .find(trigger_row.id.as_str())
                    .first(conn)
                    .await
                    .optional()
                    .map_err(|e| DatabaseErrorConverter::convert(e, "get trigger"))?;

                let Some(existing) = existing else {
                    insert_trigger(conn, trigger_row).await?;
                    return job_repo::insert_jobs(conn, jobs).await;
                };

                if existing.trigger_type == trigger_row.trigger_type
                    && existing.trigger_data == trigger_row.trigger_data
                    && existing.job_type == trigger_row.job_type
                    && existing.job_args == trigger_row.job_args
                {
                    return Ok(());
                }

                job_repo::delete_scheduled_jobs_for_trigger(conn, &trigger_row.id).await?;
                update_trigger(conn, trigger_row).await
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn get_trigger(
        &self,
        tenant_id: Option<&str>,
        trigger_id: &str,
    ) -> Result<JobTrigger> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let mut query = trigger::table
            .into_boxed()
            .filter(trigger::id.eq(trigger_id));
        if let Some(tenant_id) = tenant_id {
            query = query.filter(trigger::tenant_id.eq(tenant_id));
        }

        query.first(&mut conn).await.map_err(|e| match e {
            diesel::result::Error::NotFound => Error::NotFound {
                entity: "trigger".to_string(),
                field: "id".to_string(),
                value: trigger_id.to_string(),
            },
            other => DatabaseErrorConverter::convert(other, "get trigger"),
        })
    }

    pub async fn list_triggers(&self, tenant_id: Option<&str>) -> Result<Vec<JobTrigger>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let mut query = trigger::table.into_boxed();
        if let Some(tenant_id) = tenant_id {
            query = query.filter(trigger::tenant_id.eq(tenant_id));
        }

        query
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert(e, "list triggers"))
    }

    /// Triggers whose watermark is behind `cutoff` and need materialization.
    pub async fn get_triggers_to_update(&self, cutoff: NaiveDateTime) -> Result<Vec<JobTrigger>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        trigger::table
            .filter(trigger::scheduled_until.lt(cutoff))
            .load(&mut conn)
            .await
            .map_err(|e| DatabaseErrorConverter::convert(e, "get triggers to update"))
    }

    /// Conditionally advances a trigger's watermark from `expected_prev`.
    pub async fn update_scheduled_until(
        &self,
        trigger_id: &str,
        new_until: NaiveDateTime,
        expected_prev: NaiveDateTime,
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        update_scheduled_until(&mut conn, trigger_id, new_until, expected_prev).await
    }

    /// Advances the watermark and inserts the materialized jobs in one
    /// transaction; a lost watermark race rolls both back with a conflict.
    pub async fn schedule_new_jobs_from_trigger(
        &self,
        trigger_row: &JobTrigger,
        prev_until: NaiveDateTime,
        jobs: &[JobData],
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, Error, _>(|conn| {
            async move {
                update_scheduled_until(
                    conn,
                    &trigger_row.id,
                    trigger_row.scheduled_until,
                    prev_until,
                )
                .await?;
                job_repo::insert_jobs(conn, jobs).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Deletes a trigger after deleting its still-scheduled jobs, in one
    /// transaction so no orphaned scheduled work survives.
    pub async fn delete_trigger(&self, trigger_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, Error, _>(|conn| {
            async move {
                job_repo::delete_scheduled_jobs_for_trigger(conn, trigger_id).await?;
                diesel::delete(trigger::table.find(trigger_id))
                    .execute(conn)
                    .await
                    .map_err(|e| DatabaseErrorConverter::convert_delete(e, "delete trigger"))?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}

async fn insert_trigger(conn: &mut AsyncPgConnection, trigger_row: &JobTrigger) -> Result<()> {
    info!(
        trigger_id = %trigger_row.id,
        job_type = %trigger_row.job_type,
        trigger_type = %trigger_row.trigger_type,
        "inserting job trigger"
    );
    diesel::insert_into(trigger::table)
        .values(trigger_row)
        .execute(conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert(e, "insert trigger"))?;
    Ok(())
}

/// Updates a trigger row in place, leaving `created_at` untouched.
async fn update_trigger(conn: &mut AsyncPgConnection, trigger_row: &JobTrigger) -> Result<()> {
    let updated = diesel::update(trigger::table.find(trigger_row.id.as_str()))
        .set((
            trigger::trigger_type.eq(trigger_row.trigger_type.as_str()),
            trigger::trigger_data.eq(trigger_row.trigger_data.as_str()),
            trigger::scheduled_until.eq(trigger_row.scheduled_until),
            trigger::job_type.eq(trigger_row.job_type.as_str()),
            trigger::job_args.eq(trigger_row.job_args.as_str()),
            trigger::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .await
        .map_err(|e| DatabaseErrorConverter::convert(e, "update trigger"))?;

    if updated == 0 {
        return Err(Error::NotFound {
            entity: "trigger".to_string(),
            field: "id".to_string(),
            value: trigger_row.id.clone(),
        });
    }
    Ok(())
}

async fn update_scheduled_until(
    conn: &mut AsyncPgConnection,
    trigger_id: &str,
    new_until: NaiveDateTime,
    expected_prev: NaiveDateTime,
) -> Result<()> {
    let updated = diesel::update(
        trigger::table
            .filter(trigger::id.eq(trigger_id))
            .filter(trigger::scheduled_until.eq(expected_prev)),
    )
    .set((
        trigger::scheduled_until.eq(new_until),
        trigger::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)
    .await
    .map_err(|e| DatabaseErrorConverter::convert(e, "update scheduled_until"))?;

    if updated != 1 {
        return Err(Error::Conflict {
            message: "scheduled_until was updated by another process".to_string(),
        });
    }
    Ok(())
}
