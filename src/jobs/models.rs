use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::jobs::types::JobStatus;
use crate::schema::{job_data, trigger};

/// A persisted recurrence rule together with the job it materializes.
///
/// `scheduled_until` is the watermark: fire times at or before it already
/// have `job_data` rows. Materialization advances it with a conditional
/// update so concurrent workers cannot double-schedule.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = trigger)]
pub struct JobTrigger {
    pub id: String,
    pub tenant_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub trigger_type: String,
    pub trigger_data: String,
    pub scheduled_until: NaiveDateTime,
    pub job_type: String,
    pub job_args: String,
}

/// One scheduled execution of a job.
///
/// `nonce` is rewritten by every claiming transition (acquisition and the
/// reaper), and the result write is conditioned on it, so a stale worker
/// cannot overwrite a row someone else owns.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, QueryableByName, Selectable, Insertable, Serialize)]
#[diesel(table_name = job_data)]
pub struct JobData {
    pub id: String,
    pub tenant_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub status: JobStatus,
    #[serde(skip_serializing)]
    pub nonce: i64,
    pub trigger_id: Option<String>,
    pub run_at: NaiveDateTime,
    pub job_type: String,
    pub args: String,
    pub result: Option<String>,
}
