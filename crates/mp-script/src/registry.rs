//! Registry of custom step handlers
//!
//! Applications extend the step vocabulary by registering async handlers
//! under a name; a `custom` step names the handler it wants.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{StepFault, StepResult};
use crate::outcome::StepOutcome;

/// Future type for async step handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<StepOutcome>> + Send>>;

/// Step handler function type
pub type StepHandler = Arc<dyn Fn(StepCall) -> HandlerFuture + Send + Sync>;

/// Input handed to a custom step handler
#[derive(Debug, Clone)]
pub struct StepCall {
    pub run_id: String,
    pub step_id: String,
    pub handler: String,
    /// Step params with placeholders already resolved
    pub params: Value,
    /// Snapshot of the run's variables
    pub variables: Map<String, Value>,
}

/// Custom step handlers indexed by name
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, StepHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a handler
    #[instrument(skip(self, name, handler))]
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(StepCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StepOutcome>> + Send + 'static,
    {
        let name = name.into();
        debug!(handler = %name, "Registering step handler");

        let handler: StepHandler = Arc::new(move |call| Box::pin(handler(call)) as HandlerFuture);
        self.handlers.insert(name, handler);
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.handlers.remove(name).is_some();
        if removed {
            debug!(handler = %name, "Unregistered step handler");
        }
        removed
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.iter().map(|h| h.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Call the handler named in `call`
    ///
    /// A missing handler or a handler error is a fault.
    #[instrument(skip(self, call), fields(handler = %call.handler, step = %call.step_id))]
    pub async fn call(&self, call: StepCall) -> StepResult<StepOutcome> {
        let handler = self
            .handlers
            .get(&call.handler)
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                warn!("Step handler not found");
                StepFault::UnknownHandler(call.handler.clone())
            })?;

        let name = call.handler.clone();
        debug!("Calling step handler");

        handler(call).await.map_err(|e| StepFault::Handler {
            handler: name,
            message: format!("{:#}", e),
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
