use std::collections::HashMap;
use std::sync::Arc;

use ahrian_core::error::{AhrianError, Result};
use ahrian_core::traits::AgentExecutor;
use ahrian_core::types::AgentKind;

/// Registry of agent executors keyed by agent kind.
///
/// Orchestrator steps never reach the registry: they are served by the
/// synthesizer or the intermediate orchestrator.
pub struct ExecutorRegistry {
    executors: HashMap<AgentKind, Arc<dyn AgentExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under the kind it reports, replacing any previous one.
    pub fn register(&mut self, executor: impl AgentExecutor) -> Result<()> {
        self.register_arc(Arc::new(executor))
    }

    /// Register a shared executor.
    pub fn register_arc(&mut self, executor: Arc<dyn AgentExecutor>) -> Result<()> {
        let kind = executor.kind();
        if kind.is_orchestrator() {
            return Err(AhrianError::Config(
                "orchestrator steps are served by the synthesizer and intermediate orchestrator"
                    .into(),
            ));
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    /// Unregister the executor for a kind.
    pub fn unregister(&mut self, kind: AgentKind) -> bool {
        self.executors.remove(&kind).is_some()
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn AgentExecutor>> {
        self.executors.get(&kind)
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|k| self.executors.contains_key(k))
            .collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
