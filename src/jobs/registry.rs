use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::jobs::scheduler::ArgProcessorHook;
use crate::jobs::types::{Job, JobContext};

pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// A handler specialized at registration time: decodes the raw payload
/// into its concrete type, validates it, applies the optional payload
/// rewriter, and executes it.
pub(crate) type HandlerFn =
    Arc<dyn Fn(JobContext, JsonValue, Option<ArgProcessorHook>) -> HandlerFuture + Send + Sync>;

/// Process-wide mapping from job type to its typed handler.
///
/// The registry is populated at startup and immutable afterwards;
/// registering the same job type twice is a programmer error and panics.
pub struct JobRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers the payload type `T` under its `job_type` key.
    ///
    /// # Panics
    /// Panics if a handler is already registered for the same job type.
    pub fn register<T: Job>(&mut self) -> &mut Self {
        let handler: HandlerFn = Arc::new(|ctx, mut args, arg_processor| {
            Box::pin(async move {
                let payload = T::deserialize(&args)?;
                payload.validate()?;

                // The rewriter runs on already-validated args; its output
                // is decoded again before execution.
                let payload = match arg_processor {
                    Some(arg_processor) => {
                        arg_processor(&ctx, &mut args)?;
                        T::deserialize(&args)?
                    }
                    None => payload,
                };
                payload.execute(ctx).await
            })
        });

        let job_type = T::job_type();
        if self.handlers.insert(job_type.to_string(), handler).is_some() {
            panic!("handler already registered for job type {job_type}");
        }
        self
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub(crate) fn handler(&self, job_type: &str) -> Result<HandlerFn> {
        self.handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| Error::UnregisteredJobType {
                job_type: job_type.to_string(),
            })
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use crate::db::AsyncDbPool;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        msg: String,
    }

    #[async_trait]
    impl Job for Echo {
        fn job_type() -> &'static str {
            "echo"
        }

        fn validate(&self) -> Result<()> {
            if self.msg.is_empty() {
                return Err(Error::validation("msg must not be empty"));
            }
            Ok(())
        }

        async fn execute(&self, _ctx: JobContext) -> Result<String> {
            Ok(self.msg.clone())
        }
    }

    fn test_pool() -> AsyncDbPool {
        use diesel_async::pooled_connection::bb8::Pool;
        use diesel_async::pooled_connection::AsyncDieselConnectionManager;
        use diesel_async::AsyncPgConnection;

        // Never connects; handlers under test do not touch the database.
        let manager =
            AsyncDieselConnectionManager::<AsyncPgConnection>::new("postgresql://localhost/unused");
        Pool::builder().build_unchecked(manager)
    }

    fn test_context(job_type: &str) -> JobContext {
        JobContext {
            job_id: "01JBLZX5M0000000000000TEST".to_string(),
            job_type: job_type.to_string(),
            tenant_id: None,
            trigger_id: None,
            pool: test_pool(),
            core: std::sync::Weak::new(),
        }
    }

    #[tokio::test]
    async fn registered_handler_decodes_and_executes() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"msg": "hi"}), None)
            .await
            .unwrap();

        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_execution() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"msg": ""}), None).await;

        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn malformed_payload_fails_decoding() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"message": 7}), None).await;

        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn arg_processor_rewrites_the_validated_payload() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        let processor: ArgProcessorHook = Arc::new(|_ctx, args| {
            args["msg"] = json!("rewritten");
            Ok(())
        });

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"msg": "hi"}), Some(processor))
            .await
            .unwrap();

        assert_eq!(result, "rewritten");
    }

    #[tokio::test]
    async fn arg_processor_runs_after_decode_and_validate() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        // The rewriter would make the payload valid, but validation has
        // already seen the empty msg by the time it runs.
        let processor: ArgProcessorHook = Arc::new(|_ctx, args| {
            args["msg"] = json!("fixed");
            Ok(())
        });

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"msg": ""}), Some(processor)).await;

        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn arg_processor_failure_fails_before_execution() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();

        let processor: ArgProcessorHook =
            Arc::new(|_ctx, _args| Err(Error::validation("payload rejected")));

        let handler = registry.handler("echo").unwrap();
        let result = handler(test_context("echo"), json!({"msg": "hi"}), Some(processor)).await;

        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn missing_handler_is_reported() {
        let registry = JobRegistry::new();
        let result = registry.handler("unknown");
        assert!(matches!(result, Err(Error::UnregisteredJobType { .. })));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();
        registry.register::<Echo>();
    }
}
