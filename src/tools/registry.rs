//! Actions the host can run locally, looked up by tool name.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Tool schema advertised to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Whether a human signed off on this execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    NotRequired,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub tool_name: String,
    pub args: Value,
    pub authorization: Authorization,
}

#[derive(Debug)]
pub enum ActionError {
    /// No action is registered under this name.
    NotFound(String),
    /// The action ran and failed.
    Failed(anyhow::Error),
}

impl ActionError {
    /// True when the failure means "not handled here" rather than "broken".
    ///
    /// Registries that only report plain errors are still recognised by the
    /// wording of their message.
    pub fn is_not_registered(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Failed(error) => {
                let message = error.to_string().to_ascii_lowercase();
                message.contains("not found") || message.contains("not registered")
            }
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "Action {name} not found"),
            Self::Failed(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::Failed(error) => Some(error.as_ref()),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(error)
    }
}

#[async_trait]
pub trait ActionRegistry: Send + Sync {
    fn is_confirmation_required(&self, tool_name: &str) -> Result<bool>;

    async fn execute(&self, request: ActionRequest) -> Result<Value, ActionError>;

    /// Human-readable text shown next to a confirmation prompt.
    fn describe(&self, _tool_name: &str) -> Option<String> {
        None
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

type ActionHandler = Arc<dyn Fn(ActionRequest) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct RegisteredAction {
    definition: ToolDefinition,
    requires_confirmation: bool,
    handler: ActionHandler,
}

/// In-process registry of async handlers.
#[derive(Default)]
pub struct RegisteredActions {
    actions: RwLock<HashMap<String, RegisteredAction>>,
}

impl RegisteredActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, definition: ToolDefinition, requires_confirmation: bool, handler: F)
    where
        F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ActionHandler =
            Arc::new(move |request| -> BoxFuture<'static, Result<Value>> {
                Box::pin(handler(request))
            });
        let name = definition.name.clone();
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name,
                RegisteredAction {
                    definition,
                    requires_confirmation,
                    handler,
                },
            );
    }

    pub fn unregister(&self, tool_name: &str) -> bool {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_name)
            .is_some()
    }

    pub fn has_action(&self, tool_name: &str) -> bool {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tool_name)
    }
}

#[async_trait]
impl ActionRegistry for RegisteredActions {
    fn is_confirmation_required(&self, tool_name: &str) -> Result<bool> {
        Ok(self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
            .is_some_and(|action| action.requires_confirmation))
    }

    async fn execute(&self, request: ActionRequest) -> Result<Value, ActionError> {
        let handler = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.tool_name)
            .map(|action| Arc::clone(&action.handler));
        let Some(handler) = handler else {
            return Err(ActionError::NotFound(request.tool_name));
        };
        handler(request).await.map_err(ActionError::Failed)
    }

    fn describe(&self, tool_name: &str) -> Option<String> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
            .map(|action| action.definition.description.clone())
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|action| action.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}
