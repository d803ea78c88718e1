use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExecutorError;
use crate::Executor;

/// Name-to-backend table, built once at startup from configuration.
///
/// Lookups borrow from the table; there is no global registry and no
/// registration after construction.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.name().to_owned(), executor);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownExecutor {
                name: name.to_owned(),
                available: self.names(),
            })
    }

    /// Registered backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionMetadata, ExecutorOutput};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Executor for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            _content: &str,
            _metadata: &ExecutionMetadata,
        ) -> Result<ExecutorOutput, ExecutorError> {
            Ok(ExecutorOutput {
                success: Some(true),
                content: String::new(),
                failure_details: None,
            })
        }
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named("claude")));
        registry.register(Arc::new(Named("mock")));

        assert_eq!(registry.get("claude").unwrap().name(), "claude");
        assert_eq!(registry.names(), vec!["claude", "mock"]);
    }

    #[test]
    fn unknown_name_lists_available() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named("claude")));

        let err = registry.get("gpt").err().expect("lookup should fail");
        let message = err.to_string();
        assert!(message.contains("gpt"));
        assert!(message.contains("claude"));
    }
}
