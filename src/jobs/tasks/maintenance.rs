//! Internal maintenance jobs.
//!
//! The scheduler drives itself through the same job table as user jobs:
//! trigger materialization and the timeout reaper are ordinary handlers,
//! scheduled by repeat triggers that every worker upserts on start.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jobs::types::{Job, JobContext};

pub const PROCESS_TRIGGERS_JOB_TYPE: &str = "jobrun:ProcessTriggers";
pub const MARK_INCOMPLETE_JOBS_JOB_TYPE: &str = "jobrun:MarkIncompleteJobs";

/// Materializes due triggers into concrete scheduled job rows.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProcessTriggers {}

#[async_trait]
impl Job for ProcessTriggers {
    fn job_type() -> &'static str {
        PROCESS_TRIGGERS_JOB_TYPE
    }

    async fn execute(&self, ctx: JobContext) -> Result<String> {
        ctx.scheduler()?.process_triggers().await?;
        Ok("done".to_string())
    }
}

/// Fails `running` jobs whose worker stopped updating them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MarkIncompleteJobs {}

#[async_trait]
impl Job for MarkIncompleteJobs {
    fn job_type() -> &'static str {
        MARK_INCOMPLETE_JOBS_JOB_TYPE
    }

    async fn execute(&self, ctx: JobContext) -> Result<String> {
        ctx.scheduler()?.mark_incomplete_jobs().await?;
        Ok("done".to_string())
    }
}
