use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinError;
use vcloud_core::{AssignedJob, DispatchError};

use crate::pipeline::panic_message;
use crate::registry::FunctionRegistry;

/// Executes one accepted assignment.
///
/// Whatever the handler returns becomes the published `JobResult`; an
/// `Err` (or a panic) ends up in its `error` field.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &AssignedJob) -> Result<Value, DispatchError>;
}

/// Default handler: looks the job's function up in a [`FunctionRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryDispatcher {
    registry: Arc<FunctionRegistry>,
}

impl RegistryDispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

impl Default for RegistryDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::builtin()))
    }
}

#[async_trait]
impl JobHandler for RegistryDispatcher {
    async fn handle(&self, job: &AssignedJob) -> Result<Value, DispatchError> {
        let function = job.function_name()?.to_string();
        let args = job.arg_list(&function)?;

        // job functions are plain blocking code
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.invoke(&function, &args))
            .await
            .unwrap_or_else(|e| Err(join_error(e)))
    }
}

fn join_error(e: JoinError) -> DispatchError {
    if e.is_panic() {
        DispatchError::Panicked(panic_message(e.into_panic().as_ref()))
    } else {
        DispatchError::Failed("job function was cancelled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use std::time::{Duration, Instant};

    fn assignment(function: Option<&str>, args: Vec<Value>) -> AssignedJob {
        AssignedJob {
            job_id: Some("j1".to_string()),
            client_id: Some("c1".to_string()),
            function: function.map(|name| Value::String(name.to_string())),
            args: Some(Value::Array(args)),
        }
    }

    fn nap(_: &[Value]) -> Result<Value, DispatchError> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(json!("rested"))
    }

    fn explode(_: &[Value]) -> Result<Value, DispatchError> {
        panic!("boom")
    }

    fn dispatcher_with(name: &'static str, function: crate::JobFunction) -> RegistryDispatcher {
        let registry = FunctionRegistry::builder()
            .function(name, function)
            .build()
            .unwrap();
        RegistryDispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_dispatches_by_name() {
        let dispatcher = RegistryDispatcher::default();
        let value = dispatcher
            .handle(&assignment(Some("multiply"), vec![json!(6), json!(7)]))
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_missing_function_name() {
        let dispatcher = RegistryDispatcher::default();
        assert_eq!(
            dispatcher.handle(&assignment(None, vec![])).await,
            Err(DispatchError::MissingFunction)
        );
    }

    #[tokio::test]
    async fn test_non_list_args_are_an_argument_error() {
        let dispatcher = RegistryDispatcher::default();
        let mut job = assignment(Some("add"), vec![]);
        job.args = Some(json!(5));
        assert!(matches!(
            dispatcher.handle(&job).await,
            Err(DispatchError::InvalidArguments { .. })
        ));
    }

    // current-thread runtime: the two calls can only overlap off the runtime thread
    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_functions_run_in_parallel() {
        let dispatcher = dispatcher_with("nap", nap);
        let job = assignment(Some("nap"), vec![]);

        let started = Instant::now();
        let (first, second) = tokio::join!(dispatcher.handle(&job), dispatcher.handle(&job));
        let elapsed = started.elapsed();

        assert_eq!(first, Ok(json!("rested")));
        assert_eq!(second, Ok(json!("rested")));
        assert!(elapsed < Duration::from_millis(750), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_panicking_function_becomes_error() {
        let dispatcher = dispatcher_with("explode", explode);
        assert_eq!(
            dispatcher.handle(&assignment(Some("explode"), vec![])).await,
            Err(DispatchError::Panicked("boom".to_string()))
        );
    }
}
