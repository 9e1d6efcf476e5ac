pub mod models;
pub mod registry;
pub mod scheduler;
pub mod tasks;
pub mod types;

pub use models::{JobData, JobTrigger};
pub use registry::JobRegistry;
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use types::{Job, JobContext, JobStatus};
