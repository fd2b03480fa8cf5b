//! Tool-call relay.
//!
//! The model requests a capability by name with JSON arguments and a call id.
//! Known capabilities run on their own task, bounded by a timeout, and their
//! outcome comes back to the owning session over a channel; the session then
//! answers the model and notifies the client exactly once per call id.
//! Unknown names are ignored.

mod current_time;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::core::realtime::{FunctionCall, FunctionDeclaration};

pub use current_time::{CURRENT_TIME_TOOL, CurrentTimeTool};

/// Default bound on a single tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

const OUTCOME_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unrecognized tool: {0}")]
    Unrecognized(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call {0} is already pending")]
    DuplicateCall(String),

    #[error("Tool execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

/// A capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn declaration(&self) -> FunctionDeclaration;

    async fn call(&self, args: &Value) -> Result<String, ToolError>;
}

/// Capabilities available to sessions, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in capabilities.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CurrentTimeTool::new()));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations to advertise in the session setup, sorted by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<_> = self.tools.values().map(|t| t.declaration()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }
}

/// Finished tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call: FunctionCall,
    pub result: Result<String, ToolError>,
}

/// Per-session dispatcher of tool invocations.
pub struct ToolRelay {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    outcomes: mpsc::Sender<ToolOutcome>,
    pending: HashMap<String, AbortHandle>,
}

impl ToolRelay {
    /// Create a relay and the receiver of its outcomes.
    pub fn new(
        registry: Arc<ToolRegistry>,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<ToolOutcome>) {
        let (outcomes, rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        (
            Self {
                registry,
                timeout,
                outcomes,
                pending: HashMap::new(),
            },
            rx,
        )
    }

    /// Start executing `call`.
    pub fn dispatch(&mut self, call: FunctionCall) -> Result<(), ToolError> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Err(ToolError::Unrecognized(call.name));
        };
        if self.pending.contains_key(&call.id) {
            return Err(ToolError::DuplicateCall(call.id));
        }

        debug!(call_id = %call.id, tool = %call.name, "Dispatching tool call");

        let id = call.id.clone();
        let timeout = self.timeout;
        let outcomes = self.outcomes.clone();
        let handle = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, tool.call(&call.args)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(timeout)),
            };
            // The session may be gone; nobody is left to answer then.
            let _ = outcomes.send(ToolOutcome { call, result }).await;
        });

        self.pending.insert(id, handle.abort_handle());
        Ok(())
    }

    /// Mark an outcome as delivered.
    ///
    /// Returns false when the call is no longer pending (cancelled or already
    /// answered); the outcome must then be discarded.
    pub fn settle(&mut self, outcome: &ToolOutcome) -> bool {
        self.pending.remove(&outcome.call.id).is_some()
    }

    /// Abort pending calls by id. Returns how many were pending.
    pub fn cancel(&mut self, ids: &[String]) -> usize {
        let mut cancelled = 0;
        for id in ids {
            if let Some(handle) = self.pending.remove(id) {
                handle.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(count = cancelled, "Cancelled pending tool calls");
        }
        cancelled
    }

    /// Abort everything still running.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.pending.drain() {
            warn!(call_id = %id, "Aborting pending tool call");
            handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ToolRelay {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}
