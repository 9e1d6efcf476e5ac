mod maintenance;

pub use maintenance::{
    MarkIncompleteJobs, ProcessTriggers, MARK_INCOMPLETE_JOBS_JOB_TYPE, PROCESS_TRIGGERS_JOB_TYPE,
};
