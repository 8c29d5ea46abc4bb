//! Application layer errors

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the extension runtime and by extensions themselves
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Permission denied: plugin '{plugin}' is not granted '{permission}'")]
    PermissionDenied { plugin: String, permission: String },

    #[error("Plugin '{0}' already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("Plugin '{plugin}' failed to initialize: {reason}")]
    InitializationFailed { plugin: String, reason: String },

    #[error("Plugin '{plugin}' failed to shut down: {reason}")]
    ShutdownFailed { plugin: String, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Plugin '{plugin}' exceeded {resource} limit: {detail}")]
    ResourceLimitExceeded {
        plugin: String,
        resource: String,
        detail: String,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Plugin '{plugin}' timed out during {operation} after {after:?}")]
    Timeout {
        plugin: String,
        operation: String,
        after: Duration,
    },

    #[error("Plugin '{plugin}' failed: {reason}")]
    Execution { plugin: String, reason: String },

    #[error("Plugin '{plugin}' requires '{dependency}' to be loaded first")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' is required by: {}", .dependents.join(", "))]
    DependencyInUse {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("Call cancelled")]
    Cancelled,

    #[error("Runtime is shutting down")]
    ShuttingDown,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{} plugin errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<PluginError>),
}

fn join_errors(errors: &[PluginError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PluginError {
    /// Error raised by an extension while handling a call
    pub fn execution(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::Execution {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    pub fn permission_denied(plugin: impl Into<String>, permission: impl ToString) -> Self {
        PluginError::PermissionDenied {
            plugin: plugin.into(),
            permission: permission.to_string(),
        }
    }

    pub fn lock_poisoned() -> Self {
        PluginError::Internal("Lock poisoned".to_string())
    }

    /// Stable code for structured logging
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::PermissionDenied { .. } => "permission_denied",
            PluginError::AlreadyLoaded(_) => "already_loaded",
            PluginError::NotFound(_) => "not_found",
            PluginError::InitializationFailed { .. } => "initialization_failed",
            PluginError::ShutdownFailed { .. } => "shutdown_failed",
            PluginError::UnknownCommand(_) => "unknown_command",
            PluginError::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            PluginError::Manifest(_) => "manifest_invalid",
            PluginError::Load(_) => "load_failed",
            PluginError::Timeout { .. } => "timeout",
            PluginError::Execution { .. } => "execution_failed",
            PluginError::MissingDependency { .. } => "missing_dependency",
            PluginError::DependencyInUse { .. } => "dependency_in_use",
            PluginError::Cancelled => "cancelled",
            PluginError::ShuttingDown => "shutting_down",
            PluginError::Database(_) => "database_error",
            PluginError::Internal(_) => "internal_error",
            PluginError::Aggregate(_) => "aggregate",
        }
    }
}

/// Result alias used across the runtime
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors surfaced by the host binary
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_error() {
        let err = PluginError::Aggregate(vec![
            PluginError::ShutdownFailed {
                plugin: "a".into(),
                reason: "boom".into(),
            },
            PluginError::NotFound("b".into()),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 plugin errors"));
        assert!(text.contains("'a' failed to shut down: boom"));
        assert!(text.contains("'b' not found"));
        assert_eq!(err.code(), "aggregate");
    }

    #[test]
    fn permission_denied_names_capability() {
        let err = PluginError::permission_denied("spy", "network-access");
        assert_eq!(
            err.to_string(),
            "Permission denied: plugin 'spy' is not granted 'network-access'"
        );
    }
}
