use super::context::JobContext;
use super::error::JobError;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A unit of work a template can point at through its `function_id`.
///
/// The queue only knows that a function takes a progress-carrying context
/// plus the invocation arguments, and returns a JSON result or an error.
#[async_trait]
pub trait JobFunction: Send + Sync {
    /// Identifier templates refer to.
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, ctx: &JobContext, args: Value) -> Result<Value>;
}

/// Adapter turning an async closure into a [`JobFunction`].
pub struct FnJobFunction<F> {
    id: String,
    description: String,
    f: F,
}

impl<F, Fut> FnJobFunction<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    pub fn new(id: impl Into<String>, description: impl Into<String>, f: F) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> JobFunction for FnJobFunction<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &JobContext, args: Value) -> Result<Value> {
        (self.f)(ctx.clone(), args).await
    }
}

/// Resolves `function_id`s to the functions the service was built with.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn JobFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: Arc<dyn JobFunction>) -> Result<(), JobError> {
        let id = function.id().to_string();
        if self.functions.contains_key(&id) {
            return Err(JobError::Validation(format!(
                "function '{}' is already registered",
                id
            )));
        }
        self.functions.insert(id, function);
        Ok(())
    }

    /// Register an async closure under `id`.
    pub fn register_fn<F, Fut>(&mut self, id: &str, f: F) -> Result<(), JobError>
    where
        F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnJobFunction::new(id, "", f)))
    }

    pub fn resolve(&self, function_id: &str) -> Result<Arc<dyn JobFunction>, JobError> {
        self.functions
            .get(function_id)
            .cloned()
            .ok_or_else(|| JobError::UnknownFunction(function_id.to_string()))
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.functions.contains_key(function_id)
    }

    /// `(id, description)` pairs, sorted by id.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut functions: Vec<_> = self
            .functions
            .values()
            .map(|f| (f.id().to_string(), f.description().to_string()))
            .collect();
        functions.sort();
        functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::progress::ProgressChannel;
    use crate::job_store::SqliteJobStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_and_resolve_closure() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn("double", |_ctx, args| async move {
                let n = args.as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            })
            .unwrap();

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());
        let ctx = JobContext::new(
            "job-1",
            Arc::new(ProgressChannel::new("job-1", tracing::Level::INFO)),
            store,
        );

        let function = registry.resolve("double").unwrap();
        assert_eq!(function.execute(&ctx, json!(21)).await.unwrap(), json!(42));
    }

    #[test]
    fn test_duplicate_and_unknown_functions() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn("noop", |_, _| async { Ok(Value::Null) })
            .unwrap();

        assert!(matches!(
            registry.register_fn("noop", |_, _| async { Ok(Value::Null) }),
            Err(JobError::Validation(_))
        ));
        assert!(matches!(
            registry.resolve("missing"),
            Err(JobError::UnknownFunction(id)) if id == "missing"
        ));
        assert!(registry.contains("noop"));
        assert_eq!(registry.list(), vec![("noop".to_string(), String::new())]);
    }
}
