use std::sync::{Arc, Weak};

use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::db::AsyncDbPool;
use crate::error::{Error, Result};
use crate::jobs::models::JobData;
use crate::jobs::scheduler::SchedulerCore;

/// Job execution status.
///
/// Transitions are monotone within one execution:
/// `scheduled -> running -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[ExistingTypePath = "crate::schema::sql_types::JobStatus"]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Execution context passed to job payloads.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub job_type: String,
    pub tenant_id: Option<String>,
    pub trigger_id: Option<String>,
    pub pool: AsyncDbPool,
    pub(crate) core: Weak<SchedulerCore>,
}

impl JobContext {
    pub(crate) fn new(job: &JobData, pool: AsyncDbPool, core: Weak<SchedulerCore>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            tenant_id: job.tenant_id.clone(),
            trigger_id: job.trigger_id.clone(),
            pool,
            core,
        }
    }

    pub(crate) fn scheduler(&self) -> Result<Arc<SchedulerCore>> {
        self.core
            .upgrade()
            .ok_or_else(|| Error::internal("scheduler is no longer running"))
    }
}

/// A typed job payload.
///
/// The payload carries its own handler: `execute` runs on a worker after
/// the serialized `args` column has been decoded back into the type and
/// `validate` has passed. The returned string is persisted in the job's
/// `result` column ("success" when empty).
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Constant name identifying the handler for this payload type.
    fn job_type() -> &'static str
    where
        Self: Sized;

    /// Optional payload validation, run before scheduling and again before
    /// execution.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_displays_as_column_values() {
        assert_eq!(JobStatus::Scheduled.to_string(), "scheduled");
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }
}
