//! Actions, their results, and the per-request execution context.

use crate::engine::errors::EngineResult;
use crate::engine::state::State;
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one action invocation. Drives transition selection; never
/// persisted.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub data: HashMap<String, Value>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Caller identity injected by the authentication collaborator.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub id: String,
    pub display_name: Option<String>,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn system() -> Self {
        Self::new("system")
    }
}

/// Read-only settings view resolved by an external collaborator.
#[derive(Debug, Clone, Default)]
pub struct SettingsView {
    values: Arc<HashMap<String, Value>>,
}

impl SettingsView {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Per-request bundle handed to every action invocation.
///
/// Constructed fresh by the workflow driver for each action; owns the unit
/// of work for the duration of one invocation and is never persisted. There
/// is no ambient lookup: everything an action may touch arrives here.
pub struct ExecutionContext {
    pub uow: UnitOfWork,
    pub settings: SettingsView,
    pub caller: CallerIdentity,
}

impl ExecutionContext {
    pub fn new(uow: UnitOfWork, settings: SettingsView, caller: CallerIdentity) -> Self {
        Self {
            uow,
            settings,
            caller,
        }
    }
}

/// A business action: a pure function over `(State, ExecutionContext)`.
///
/// Actions are stateless and constructed fresh per invocation; side effects
/// on external backends happen only through the unit of work in the context.
/// Business failures (validation, permission) are returned as
/// `ActionResult { success: false }`; only infrastructure problems surface
/// as errors.
///
/// The returned state is a *proposal*: the driver advances the version and
/// persists it only if the underlying transaction commits.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        state: &State,
        ctx: &ExecutionContext,
    ) -> EngineResult<(State, ActionResult)>;
}
