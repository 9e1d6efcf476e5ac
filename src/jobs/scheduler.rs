use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use serde_json::Value as JsonValue;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use ulid::Ulid;

use crate::config::DatabaseConfig;
use crate::db::{establish_async_connection_pool, run_migrations, AsyncDbPool};
use crate::error::{Error, Result};
use crate::jobs::models::{JobData, JobTrigger};
use crate::jobs::registry::JobRegistry;
use crate::jobs::tasks::{MarkIncompleteJobs, ProcessTriggers};
use crate::jobs::types::{Job, JobContext, JobStatus};
use crate::logger;
use crate::repositories::{JobRepository, TriggerRepository};
use crate::triggers::{
    CronTrigger, RepeatTrigger, RunOnceTrigger, Trigger, TriggerRegistry, RUN_ONCE_TRIGGER_TYPE,
};

const PROCESS_TRIGGERS_TRIGGER_KEY: &str = "jobrun:processTriggers";
const MARK_INCOMPLETE_TRIGGER_KEY: &str = "jobrun:markIncompleteJobs";

const PROCESS_TRIGGERS_INTERVAL: Duration = Duration::from_secs(30);
const MARK_INCOMPLETE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Hard per-job wall-clock deadline. Deliberately shorter than the default
/// reaper timeout, so a healthy worker fails its own jobs before the reaper
/// has to.
const JOB_DEADLINE: Duration = Duration::from_secs(3 * 60);

/// Materialization look-ahead window: jobs are created for fire times up to
/// this far in the future, so workers keep finding due jobs even if the
/// materialization loop stalls briefly.
const SCHEDULE_LOOKAHEAD: Duration = Duration::from_secs(3 * 60);

/// Backstop for a trigger whose fire times never advance past the window.
const MAX_FIRES_PER_PASS: usize = 10_000;

pub type OnJobInitHook = Arc<dyn Fn(&JobContext) + Send + Sync>;
pub type ArgProcessorHook =
    Arc<dyn Fn(&JobContext, &mut JsonValue) -> Result<()> + Send + Sync>;
pub type OnJobCompleteHook = Arc<dyn Fn(&JobContext, &str, Option<&Error>) + Send + Sync>;

/// Scheduler tuning knobs and hooks.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// How often each worker checks for new jobs to run.
    pub batch_freq: Duration,
    /// How many new jobs to claim per tick. There is no limit on the
    /// number of concurrent jobs within a worker.
    pub batch_size: i64,
    /// How long a job may sit in `running` before the reaper fails it.
    pub job_timeout: Duration,
    /// Opaque tenant token stamped on created rows and applied to reads.
    pub tenant_id: Option<String>,
    /// Route all logging to a no-op sink.
    pub disable_logging: bool,
    /// Called before each job executes.
    pub on_job_init: Option<OnJobInitHook>,
    /// May rewrite the payload after it has been decoded and validated;
    /// a failure fails the job before execution.
    pub arg_processor: Option<ArgProcessorHook>,
    /// Called after the result write, with the result and error.
    pub on_job_complete: Option<OnJobCompleteHook>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_freq: Duration::from_secs(1),
            batch_size: 10,
            job_timeout: Duration::from_secs(10 * 60),
            tenant_id: None,
            disable_logging: false,
            on_job_init: None,
            arg_processor: None,
            on_job_complete: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_batch_freq(mut self, batch_freq: Duration) -> Self {
        self.batch_freq = batch_freq;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn without_logging(mut self) -> Self {
        self.disable_logging = true;
        self
    }

    pub fn on_job_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext) + Send + Sync + 'static,
    {
        self.on_job_init = Some(Arc::new(hook));
        self
    }

    pub fn with_arg_processor<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext, &mut JsonValue) -> Result<()> + Send + Sync + 'static,
    {
        self.arg_processor = Some(Arc::new(hook));
        self
    }

    pub fn on_job_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext, &str, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_job_complete = Some(Arc::new(hook));
        self
    }
}

/// Durable job scheduler over a shared PostgreSQL database.
///
/// Any number of instances may run against the same schema; they
/// coordinate purely through SQL transactions. Scheduling APIs work
/// without [`JobScheduler::start`], so producer-only processes can enqueue
/// jobs for dedicated workers.
#[derive(Clone)]
pub struct JobScheduler {
    core: Arc<SchedulerCore>,
}

pub(crate) struct SchedulerCore {
    pool: AsyncDbPool,
    config: SchedulerConfig,
    handlers: JobRegistry,
    triggers: TriggerRegistry,
    trigger_repo: TriggerRepository,
    job_repo: JobRepository,
    started: AtomicBool,
    shutdown: CancellationToken,
    in_flight: TaskTracker,
}

impl JobScheduler {
    /// Creates a scheduler over an existing pool with the default trigger
    /// types. The internal maintenance handlers are registered here, so
    /// their job types are reserved.
    pub fn new(pool: AsyncDbPool, handlers: JobRegistry, config: SchedulerConfig) -> Self {
        Self::with_trigger_registry(pool, handlers, TriggerRegistry::new(), config)
    }

    /// Creates a scheduler with a custom trigger registry.
    pub fn with_trigger_registry(
        pool: AsyncDbPool,
        mut handlers: JobRegistry,
        triggers: TriggerRegistry,
        config: SchedulerConfig,
    ) -> Self {
        handlers.register::<ProcessTriggers>();
        handlers.register::<MarkIncompleteJobs>();

        Self {
            core: Arc::new(SchedulerCore {
                trigger_repo: TriggerRepository::new(pool.clone()),
                job_repo: JobRepository::new(pool.clone()),
                pool,
                config,
                handlers,
                triggers,
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                in_flight: TaskTracker::new(),
            }),
        }
    }

    /// Connects to the configured database, applies pending migrations,
    /// and creates a scheduler.
    pub async fn connect(
        db_config: &DatabaseConfig,
        handlers: JobRegistry,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let pool = establish_async_connection_pool(db_config).await?;
        run_migrations(db_config).await?;
        Ok(Self::new(pool, handlers, config))
    }

    /// Like [`JobScheduler::connect`], reading the database configuration
    /// from `JOBRUN_DB_*` environment variables.
    pub async fn from_env(handlers: JobRegistry, config: SchedulerConfig) -> Result<Self> {
        let db_config = DatabaseConfig::from_env()?;
        Self::connect(&db_config, handlers, config).await
    }

    /// Starts the worker loop. Idempotent: a second call is a no-op.
    ///
    /// Registers the two internal maintenance triggers and runs one
    /// materialization pass synchronously, so a fresh process does not wait
    /// for the first repeat fire. If any of that fails the scheduler shuts
    /// back down and the error is returned.
    pub async fn start(&self) -> Result<()> {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        logger::init_logging(self.core.config.disable_logging);
        info!("starting job server");

        let core = Arc::clone(&self.core);
        tokio::spawn(async move { core.run_loop().await });

        let bootstrap = async {
            self.schedule_repeated_with_key(
                PROCESS_TRIGGERS_TRIGGER_KEY,
                PROCESS_TRIGGERS_INTERVAL,
                ProcessTriggers {},
            )
            .await?;
            self.schedule_repeated_with_key(
                MARK_INCOMPLETE_TRIGGER_KEY,
                MARK_INCOMPLETE_INTERVAL,
                MarkIncompleteJobs {},
            )
            .await?;
            // Process triggers once up front instead of waiting 30s.
            self.core.process_triggers().await
        };

        if let Err(e) = bootstrap.await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Stops the ticker and waits for in-flight job executions to finish.
    pub async fn close(&self) {
        if !self.core.started.load(Ordering::SeqCst) {
            return;
        }
        self.core.shutdown.cancel();
        self.core.in_flight.close();
        self.core.in_flight.wait().await;
    }

    /// Schedules a job for immediate execution. Returns the job id.
    pub async fn schedule_immediately<T: Job>(&self, payload: T) -> Result<String> {
        self.schedule(
            Ulid::new().to_string(),
            Box::new(RunOnceTrigger::new(Duration::ZERO)),
            payload,
        )
        .await
    }

    /// Schedules a job to run once, `delay` from now. Returns the job id.
    pub async fn schedule_after<T: Job>(&self, delay: Duration, payload: T) -> Result<String> {
        self.schedule(
            Ulid::new().to_string(),
            Box::new(RunOnceTrigger::new(delay)),
            payload,
        )
        .await
    }

    /// Schedules a job on a cron expression evaluated in `location`.
    /// Returns the trigger id.
    pub async fn schedule_cron<T: Job>(
        &self,
        cron_expr: &str,
        location: chrono_tz::Tz,
        payload: T,
    ) -> Result<String> {
        let trigger_id = Ulid::new().to_string();
        self.schedule(
            trigger_id.clone(),
            Box::new(CronTrigger::with_location(cron_expr, location)?),
            payload,
        )
        .await?;
        Ok(trigger_id)
    }

    /// Like [`JobScheduler::schedule_cron`] with a caller-supplied trigger
    /// id, for idempotent registration.
    pub async fn schedule_cron_with_key<T: Job>(
        &self,
        trigger_id: &str,
        cron_expr: &str,
        location: chrono_tz::Tz,
        payload: T,
    ) -> Result<()> {
        self.schedule(
            trigger_id.to_string(),
            Box::new(CronTrigger::with_location(cron_expr, location)?),
            payload,
        )
        .await
        .map(drop)
    }

    /// Schedules a job on a fixed interval. Returns the trigger id.
    pub async fn schedule_repeated<T: Job>(
        &self,
        interval: Duration,
        payload: T,
    ) -> Result<String> {
        let trigger_id = Ulid::new().to_string();
        self.schedule_repeated_with_key(&trigger_id, interval, payload)
            .await?;
        Ok(trigger_id)
    }

    /// Like [`JobScheduler::schedule_repeated`] with a caller-supplied
    /// trigger id, for idempotent registration.
    pub async fn schedule_repeated_with_key<T: Job>(
        &self,
        trigger_id: &str,
        interval: Duration,
        payload: T,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::validation("repeat interval must be positive"));
        }
        self.schedule(
            trigger_id.to_string(),
            Box::new(RepeatTrigger::new(interval)),
            payload,
        )
        .await
        .map(drop)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobData> {
        self.core.job_repo.get_job(self.tenant(), job_id).await
    }

    pub async fn list_jobs(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<JobData>> {
        self.core
            .job_repo
            .list_jobs(self.tenant(), start.naive_utc(), end.naive_utc())
            .await
    }

    pub async fn get_trigger(&self, trigger_id: &str) -> Result<JobTrigger> {
        self.core
            .trigger_repo
            .get_trigger(self.tenant(), trigger_id)
            .await
    }

    pub async fn list_triggers(&self) -> Result<Vec<JobTrigger>> {
        self.core.trigger_repo.list_triggers(self.tenant()).await
    }

    /// Deletes a trigger and its still-scheduled jobs.
    pub async fn delete_trigger(&self, trigger_id: &str) -> Result<()> {
        self.core.trigger_repo.delete_trigger(trigger_id).await
    }

    async fn schedule<T: Job>(
        &self,
        trigger_id: String,
        mut trigger: Box<dyn Trigger>,
        payload: T,
    ) -> Result<String> {
        payload.validate()?;

        let (trigger_row, job) = first_run(
            self.core.config.tenant_id.as_deref(),
            &trigger_id,
            trigger.as_mut(),
            &payload,
        )?;
        let job_id = job.id.clone();

        match &trigger_row {
            None => {
                self.core
                    .job_repo
                    .insert_jobs(std::slice::from_ref(&job))
                    .await?
            }
            Some(row) => {
                self.core
                    .trigger_repo
                    .upsert_trigger_with_jobs(row, std::slice::from_ref(&job))
                    .await?
            }
        }
        Ok(job_id)
    }

    fn tenant(&self) -> Option<&str> {
        self.core.config.tenant_id.as_deref()
    }
}

impl SchedulerCore {
    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.batch_freq,
            self.config.batch_freq,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = Arc::clone(&self).run_batch().await {
                        error!(error = %e, "job batch returned an error");
                    }
                }
            }
        }
    }

    async fn run_batch(self: Arc<Self>) -> Result<()> {
        let batch_id = Ulid::new().to_string();
        let span = info_span!("batch", batch_id = %batch_id);

        async {
            let jobs = self
                .job_repo
                .acquire_jobs_to_run(self.config.batch_size)
                .await?;
            if jobs.is_empty() {
                debug!("no jobs to run");
                return Ok(());
            }

            info!(job_count = jobs.len(), "running job batch");
            for job in jobs {
                let core = Arc::clone(&self);
                self.in_flight.spawn(async move { core.run_job(job).await });
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn run_job(self: Arc<Self>, job: JobData) {
        let start = std::time::Instant::now();
        let ctx = JobContext::new(&job, self.pool.clone(), Arc::downgrade(&self));
        let span = info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            trigger_id = job.trigger_id.as_deref().unwrap_or(""),
            tenant_id = job.tenant_id.as_deref().unwrap_or(""),
        );

        async {
            info!("job starting");
            if let Some(hook) = &self.config.on_job_init {
                hook(&ctx);
            }

            let (result, error) = self.execute_job(ctx.clone(), &job).await;
            let (status, result_text) = finish_status(result, error.as_ref());

            match self
                .job_repo
                .write_job_result(&job.id, job.nonce, status, &result_text)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!("job row was re-claimed since acquisition, result not recorded")
                }
                Err(e) => error!(error = %e, "failed to write job result"),
            }

            let duration_ms = start.elapsed().as_millis() as u64;
            match &error {
                None => info!(result = %result_text, duration_ms, "job completed"),
                Some(e) => error!(result = %result_text, duration_ms, error = %e, "job failed"),
            }

            if let Some(hook) = &self.config.on_job_complete {
                hook(&ctx, &result_text, error.as_ref());
            }
        }
        .instrument(span)
        .await
    }

    /// Runs the handler under the hard deadline, converting panics and
    /// timeouts into job failures. Never unwinds into the caller.
    async fn execute_job(&self, ctx: JobContext, job: &JobData) -> (String, Option<Error>) {
        let handler = match self.handlers.handler(&job.job_type) {
            Ok(handler) => handler,
            Err(e) => return (String::new(), Some(e)),
        };

        let args: JsonValue = match serde_json::from_str(&job.args) {
            Ok(args) => args,
            Err(e) => return (String::new(), Some(Error::from(e))),
        };

        let mut handle = tokio::spawn(handler(ctx, args, self.config.arg_processor.clone()));
        match tokio::time::timeout(JOB_DEADLINE, &mut handle).await {
            Ok(Ok(Ok(result))) => (result, None),
            Ok(Ok(Err(e))) => (String::new(), Some(e)),
            Ok(Err(join_error)) => (String::new(), Some(join_error_to_error(join_error))),
            Err(_) => {
                handle.abort();
                (
                    String::new(),
                    Some(Error::internal(format!(
                        "job exceeded the {}s execution deadline",
                        JOB_DEADLINE.as_secs()
                    ))),
                )
            }
        }
    }

    /// Materializes every due trigger into concrete scheduled job rows.
    ///
    /// A conflict on the watermark advance means a concurrent process got
    /// there first; that trigger is skipped and the loop continues.
    pub(crate) async fn process_triggers(&self) -> Result<()> {
        let now = Utc::now();
        let min_schedule_time = now + chrono::Duration::seconds(SCHEDULE_LOOKAHEAD.as_secs() as i64);

        let due = self
            .trigger_repo
            .get_triggers_to_update(min_schedule_time.naive_utc())
            .await?;

        for mut trigger_row in due {
            match self
                .schedule_jobs_from_trigger(&mut trigger_row, now, min_schedule_time)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    info!(trigger_id = %trigger_row.id, "trigger scheduled by concurrent process");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn schedule_jobs_from_trigger(
        &self,
        trigger_row: &mut JobTrigger,
        now: DateTime<Utc>,
        min_schedule_time: DateTime<Utc>,
    ) -> Result<()> {
        info!(
            job_type = %trigger_row.job_type,
            trigger_type = %trigger_row.trigger_type,
            trigger_id = %trigger_row.id,
            "scheduling jobs for trigger"
        );

        // Remembered so the conditional advance detects concurrent writers.
        let prev_until = trigger_row.scheduled_until;

        let mut trigger = self
            .triggers
            .load(&trigger_row.trigger_type, &trigger_row.trigger_data)?;
        let from = DateTime::<Utc>::from_naive_utc_and_offset(prev_until, Utc);
        let fire_times = plan_fire_times(trigger.as_mut(), from, now, min_schedule_time)?;

        let jobs: Vec<JobData> = fire_times
            .iter()
            .map(|fire_time| new_job_from_trigger(trigger_row, fire_time.naive_utc()))
            .collect();
        trigger_row.scheduled_until = fire_times
            .last()
            .expect("plan_fire_times returns at least one fire time")
            .naive_utc();

        self.trigger_repo
            .schedule_new_jobs_from_trigger(trigger_row, prev_until, &jobs)
            .await
    }

    /// Reaps jobs stuck in `running` past the configured timeout.
    pub(crate) async fn mark_incomplete_jobs(&self) -> Result<()> {
        let jobs = self
            .job_repo
            .mark_incomplete_jobs(self.config.job_timeout)
            .await?;
        for job in &jobs {
            error!(failed_job_id = %job.id, failed_job_type = %job.job_type, "job timed out");
        }
        Ok(())
    }
}

/// Computes the fire times a trigger owes between its watermark and the
/// look-ahead horizon. Fire times in the past collapse to `now`; the first
/// fire time past the horizon is included and becomes the new watermark.
///
/// An exhausted trigger on the very first iteration is an error; after at
/// least one fire time it just ends the sequence.
fn plan_fire_times(
    trigger: &mut dyn Trigger,
    from: DateTime<Utc>,
    now: DateTime<Utc>,
    horizon: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let mut fire_times = Vec::new();
    let mut next = from;
    loop {
        next = match trigger.next_fire_time(next) {
            Ok(next) => next,
            Err(e) => {
                if fire_times.is_empty() {
                    return Err(e);
                }
                break;
            }
        };
        if next < now {
            next = now;
        }
        fire_times.push(next);
        if next > horizon {
            break;
        }
        if fire_times.len() >= MAX_FIRES_PER_PASS {
            return Err(Error::internal(format!(
                "trigger produced more than {MAX_FIRES_PER_PASS} fire times in one pass"
            )));
        }
    }
    Ok(fire_times)
}

/// Builds the trigger row and first job row for a newly scheduled job.
///
/// Run-once triggers are not persisted: only the job row is returned and
/// it carries no trigger id.
fn first_run<T: Job>(
    tenant_id: Option<&str>,
    trigger_id: &str,
    trigger: &mut dyn Trigger,
    payload: &T,
) -> Result<(Option<JobTrigger>, JobData)> {
    let job_args = serde_json::to_string(payload)?;
    let trigger_data = trigger.serialize()?;
    let next = trigger.next_fire_time(Utc::now())?;
    let now = Utc::now().naive_utc();

    let trigger_row = JobTrigger {
        id: trigger_id.to_string(),
        tenant_id: tenant_id.map(str::to_string),
        created_at: now,
        updated_at: now,
        trigger_type: trigger.trigger_type().to_string(),
        trigger_data,
        scheduled_until: next.naive_utc(),
        job_type: T::job_type().to_string(),
        job_args,
    };
    let mut job = new_job_from_trigger(&trigger_row, next.naive_utc());

    if trigger.trigger_type() == RUN_ONCE_TRIGGER_TYPE {
        job.trigger_id = None;
        return Ok((None, job));
    }
    Ok((Some(trigger_row), job))
}

fn new_job_from_trigger(trigger_row: &JobTrigger, run_at: NaiveDateTime) -> JobData {
    let now = Utc::now().naive_utc();
    JobData {
        id: Ulid::new().to_string(),
        tenant_id: trigger_row.tenant_id.clone(),
        created_at: now,
        updated_at: now,
        status: JobStatus::Scheduled,
        nonce: rand::rng().random_range(0..i64::MAX),
        trigger_id: Some(trigger_row.id.clone()),
        run_at,
        job_type: trigger_row.job_type.clone(),
        args: trigger_row.job_args.clone(),
        result: None,
    }
}

fn finish_status(result: String, error: Option<&Error>) -> (JobStatus, String) {
    match error {
        None => {
            let result = if result.is_empty() {
                "success".to_string()
            } else {
                result
            };
            (JobStatus::Completed, result)
        }
        Some(e) => {
            let result = if result.is_empty() {
                e.to_string()
            } else {
                result
            };
            (JobStatus::Failed, result)
        }
    }
}

fn join_error_to_error(error: tokio::task::JoinError) -> Error {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "opaque panic payload".to_string()
        };
        Error::internal(format!("panic in job handler: {message}"))
    } else {
        Error::internal("job task was cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Noop {}

    #[async_trait]
    impl Job for Noop {
        fn job_type() -> &'static str {
            "noop"
        }

        async fn execute(&self, _ctx: JobContext) -> Result<String> {
            Ok(String::new())
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 4, 15, h, m, s).unwrap()
    }

    #[test]
    fn plan_clamps_missed_fires_and_covers_the_horizon() {
        let mut trigger = RepeatTrigger::new(Duration::from_secs(2));
        let now = at(12, 0, 0);
        let from = at(11, 59, 55);
        let horizon = at(12, 0, 6);

        let fire_times = plan_fire_times(&mut trigger, from, now, horizon).unwrap();

        // The missed 11:59:57 fire collapses to now, then the cadence
        // resumes from there until one fire past the horizon.
        assert_eq!(
            fire_times,
            vec![
                at(12, 0, 0),
                at(12, 0, 2),
                at(12, 0, 4),
                at(12, 0, 6),
                at(12, 0, 8),
            ]
        );
    }

    #[test]
    fn plan_preserves_fire_order() {
        let mut trigger = RepeatTrigger::new(Duration::from_secs(45));
        let now = at(12, 0, 0);

        let fire_times = plan_fire_times(&mut trigger, now, now, at(12, 3, 0)).unwrap();

        assert!(fire_times.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(*fire_times.last().unwrap() > at(12, 3, 0));
    }

    #[test]
    fn plan_stops_after_a_single_run_once_fire() {
        let mut trigger = RunOnceTrigger::new(Duration::from_secs(1));
        let now = at(12, 0, 0);

        let fire_times = plan_fire_times(&mut trigger, now, now, at(12, 3, 0)).unwrap();

        assert_eq!(fire_times, vec![at(12, 0, 1)]);
    }

    #[test]
    fn plan_surfaces_an_already_expired_trigger() {
        let mut trigger = RunOnceTrigger::new(Duration::ZERO);
        let now = at(12, 0, 0);
        trigger.next_fire_time(now).unwrap();

        let result = plan_fire_times(&mut trigger, now, now, at(12, 3, 0));
        assert!(matches!(result, Err(Error::TriggerExpired(_))));
    }

    #[test]
    fn first_run_persists_repeat_triggers() {
        let mut trigger = RepeatTrigger::new(Duration::from_secs(30));
        let (trigger_row, job) =
            first_run(Some("acme"), "trig-1", &mut trigger, &Noop {}).unwrap();

        let trigger_row = trigger_row.expect("repeat triggers are persisted");
        assert_eq!(trigger_row.id, "trig-1");
        assert_eq!(trigger_row.tenant_id.as_deref(), Some("acme"));
        assert_eq!(trigger_row.trigger_type, "repeat");
        assert_eq!(trigger_row.job_type, "noop");
        assert_eq!(trigger_row.scheduled_until, job.run_at);

        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.trigger_id.as_deref(), Some("trig-1"));
        assert_eq!(job.tenant_id.as_deref(), Some("acme"));
        assert_eq!(job.args, "{}");
    }

    #[test]
    fn first_run_does_not_persist_run_once_triggers() {
        let mut trigger = RunOnceTrigger::new(Duration::from_secs(5));
        let (trigger_row, job) = first_run(None, "trig-2", &mut trigger, &Noop {}).unwrap();

        assert!(trigger_row.is_none());
        assert!(job.trigger_id.is_none());
        assert_eq!(job.status, JobStatus::Scheduled);
    }

    #[test]
    fn job_ids_sort_by_creation_order() {
        let mut trigger = RepeatTrigger::new(Duration::from_secs(30));
        let (_, first) = first_run(None, "trig-3", &mut trigger, &Noop {}).unwrap();
        // Ulid ordering is only guaranteed across millisecond timestamps.
        std::thread::sleep(Duration::from_millis(2));
        let mut trigger = RepeatTrigger::new(Duration::from_secs(30));
        let (_, second) = first_run(None, "trig-3", &mut trigger, &Noop {}).unwrap();

        assert!(first.id < second.id);
    }

    #[test]
    fn empty_results_default_by_outcome() {
        let (status, result) = finish_status(String::new(), None);
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(result, "success");

        let (status, result) = finish_status("42".to_string(), None);
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(result, "42");

        let error = Error::validation("bad payload");
        let (status, result) = finish_status(String::new(), Some(&error));
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(result, "validation failed: bad payload");

        let (status, result) = finish_status("partial".to_string(), Some(&error));
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(result, "partial");
    }

    #[test]
    fn config_defaults_match_the_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.batch_freq, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert!(config.tenant_id.is_none());
    }
}
