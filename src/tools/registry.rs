//! Tool executor registry
//!
//! Maps tool names to executors. Thread-safe registration and lookup; the
//! coordinator looks a name up at execution time, so executors may be
//! registered or replaced between turns.

use crate::types::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Something that can run a tool call
///
/// Returning `Err` turns the call into `Failed(executor_error)`; the error
/// text is fed back to the model as the tool output.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &serde_json::Value) -> anyhow::Result<String>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn execute(&self, arguments: &serde_json::Value) -> anyhow::Result<String> {
        (self.0)(arguments.clone()).await
    }
}

struct Entry {
    executor: Arc<dyn ToolExecutor>,
    definition: Option<ToolDefinition>,
}

/// Registry of tool executors keyed by tool name
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an executor under `name`
    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        let name = name.into();
        tracing::debug!("Registering tool: {}", name);
        self.write().insert(
            name,
            Entry {
                executor,
                definition: None,
            },
        );
    }

    /// Register an executor together with the definition advertised to the model
    pub fn register_with_definition(
        &self,
        definition: ToolDefinition,
        executor: Arc<dyn ToolExecutor>,
    ) {
        tracing::debug!("Registering tool: {}", definition.name);
        self.write().insert(
            definition.name.clone(),
            Entry {
                executor,
                definition: Some(definition),
            },
        );
    }

    /// Register an async closure as an executor
    ///
    /// ```rust
    /// use a3s_orchestrator::tools::registry::ToolRegistry;
    ///
    /// let registry = ToolRegistry::new();
    /// registry.register_fn("echo", |args| async move { Ok(args.to_string()) });
    /// assert!(registry.contains("echo"));
    /// ```
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.register(name, Arc::new(FnExecutor(f)));
    }

    /// Returns true if the tool was found and removed
    pub fn unregister(&self, name: &str) -> bool {
        tracing::debug!("Unregistering tool: {}", name);
        self.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.read().get(name).map(|e| e.executor.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Definitions of tools registered with one, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .read()
            .values()
            .filter_map(|e| e.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl ToolExecutor for Upper {
        async fn execute(&self, arguments: &serde_json::Value) -> anyhow::Result<String> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("missing text"))?;
            Ok(text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register("upper", Arc::new(Upper));

        let tool = registry.get("upper").unwrap();
        assert_eq!(tool.execute(&json!({"text": "hi"})).await.unwrap(), "HI");
        assert!(tool.execute(&json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_register_fn() {
        let registry = ToolRegistry::new();
        registry.register_fn("add", |args| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok((a + b).to_string())
        });

        let out = registry
            .get("add")
            .unwrap()
            .execute(&json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(out, "5");
    }

    #[test]
    fn test_replace_and_unregister() {
        let registry = ToolRegistry::new();
        registry.register("upper", Arc::new(Upper));
        registry.register("upper", Arc::new(Upper));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("upper"));
        assert!(!registry.unregister("upper"));
        assert!(registry.is_empty());
        assert!(registry.get("upper").is_none());
    }

    #[test]
    fn test_definitions_sorted() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha"] {
            registry.register_with_definition(
                ToolDefinition {
                    name: name.to_string(),
                    description: format!("{} tool", name),
                    parameters: json!({"type": "object"}),
                },
                Arc::new(Upper),
            );
        }
        registry.register("hidden", Arc::new(Upper));

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.names(), vec!["alpha", "hidden", "zeta"]);
    }
}
