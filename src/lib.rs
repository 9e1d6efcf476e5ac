//! jobrun
//!
//! A durable, multi-process job scheduling and execution service backed by
//! PostgreSQL. Producers submit typed job payloads to run immediately,
//! after a delay, on a fixed interval, or on a cron expression; worker
//! processes poll the shared database, atomically claim due jobs, execute
//! registered handlers, and persist results. The database is the sole
//! source of truth, so any number of workers can run against the same
//! schema with no coordination beyond SQL transactions.
//!
//! ```ignore
//! use jobrun::{Job, JobContext, JobRegistry, JobScheduler, SchedulerConfig};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Hello { msg: String }
//!
//! #[async_trait::async_trait]
//! impl Job for Hello {
//!     fn job_type() -> &'static str { "hello" }
//!     async fn execute(&self, _ctx: JobContext) -> jobrun::Result<String> {
//!         Ok(self.msg.clone())
//!     }
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register::<Hello>();
//! let scheduler = JobScheduler::from_env(registry, SchedulerConfig::default()).await?;
//! scheduler.start().await?;
//! let job_id = scheduler.schedule_immediately(Hello { msg: "hi".into() }).await?;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod repositories;
pub mod schema;
pub mod triggers;

pub use error::{Error, Result};
pub use jobs::{
    Job, JobContext, JobData, JobRegistry, JobScheduler, JobStatus, JobTrigger, SchedulerConfig,
};
pub use triggers::{CronTrigger, RepeatTrigger, RunOnceTrigger, Trigger, TriggerRegistry};
