use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status an extension reports about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Running,
    Degraded,
    Error,
    Stopped,
    Unknown,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStatus::Running => "running",
            PluginStatus::Degraded => "degraded",
            PluginStatus::Error => "error",
            PluginStatus::Stopped => "stopped",
            PluginStatus::Unknown => "unknown",
        }
    }

    /// Tri-state classification of a self-reported status
    pub fn level(&self) -> HealthLevel {
        match self {
            PluginStatus::Running | PluginStatus::Unknown => HealthLevel::Healthy,
            PluginStatus::Degraded => HealthLevel::Degraded,
            PluginStatus::Error | PluginStatus::Stopped => HealthLevel::Unhealthy,
        }
    }
}

/// Liveness classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Unhealthy => "unhealthy",
        }
    }
}

/// Health snapshot: status plus message and structured details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginHealth {
    pub status: PluginStatus,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub checked_at: DateTime<Utc>,
}

impl PluginHealth {
    pub fn new(status: PluginStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: HashMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn running() -> Self {
        Self::new(PluginStatus::Running, "ok")
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(PluginStatus::Degraded, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(PluginStatus::Error, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn level(&self) -> HealthLevel {
        self.status.level()
    }
}

impl Default for PluginHealth {
    fn default() -> Self {
        Self::new(PluginStatus::Unknown, "not checked yet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_worst_last() {
        assert!(HealthLevel::Healthy < HealthLevel::Degraded);
        assert!(HealthLevel::Degraded < HealthLevel::Unhealthy);
        assert_eq!(PluginStatus::Stopped.level(), HealthLevel::Unhealthy);
        assert_eq!(PluginHealth::running().level(), HealthLevel::Healthy);
    }
}
