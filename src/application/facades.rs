//! Per-extension collaborator façades
//!
//! Each extension receives its own logger and database handle at
//! initialization. Neither exposes anything the extension's manifest did
//! not grant.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::application::errors::PluginError;
use crate::application::monitor::UsageReporter;
use crate::application::security::SecurityManager;
use crate::domain::entities::{Permission, PermissionSet};
use crate::domain::traits::{Database, Fields, LogLevel, Logger, Row};

/// Statements an extension may never run against the shared store
static FORBIDDEN_STATEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(attach|detach|pragma|vacuum)\b").unwrap());

/// Logger that tags every record with the owning extension
#[derive(Debug, Clone)]
pub struct ScopedLogger {
    plugin: String,
}

impl ScopedLogger {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self { plugin: plugin.into() }
    }
}

fn render_fields(fields: &Fields) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let map: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Value::Object(map).to_string()
}

impl Logger for ScopedLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &Fields) {
        let fields = render_fields(fields);
        let plugin = self.plugin.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(plugin, fields = %fields, "{}", message),
            LogLevel::Info => tracing::info!(plugin, fields = %fields, "{}", message),
            LogLevel::Warn => tracing::warn!(plugin, fields = %fields, "{}", message),
            LogLevel::Error => tracing::error!(plugin, fields = %fields, "{}", message),
        }
    }
}

/// True when a `;` outside quotes is followed by another statement
fn is_stacked(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, ';') => {
                if !sql[i + 1..].trim_start_matches(|c: char| c == ';' || c.is_whitespace()).is_empty() {
                    return true;
                }
            }
            (None, _) => {}
        }
    }
    false
}

/// Database handle gated by `access-db` and the connection limit
pub struct ScopedDatabase {
    plugin: String,
    inner: Option<Arc<dyn Database>>,
    granted: PermissionSet,
    security: Arc<SecurityManager>,
    usage: UsageReporter,
}

impl ScopedDatabase {
    pub fn new(
        plugin: impl Into<String>,
        inner: Option<Arc<dyn Database>>,
        granted: PermissionSet,
        security: Arc<SecurityManager>,
        usage: UsageReporter,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            inner,
            granted,
            security,
            usage,
        }
    }

    fn admit(&self, sql: &str) -> Result<&Arc<dyn Database>, PluginError> {
        self.security
            .check_permission(&self.plugin, &self.granted, Permission::AccessDb)?;

        if FORBIDDEN_STATEMENT.is_match(sql) {
            tracing::warn!(plugin = %self.plugin, "Rejected privileged SQL statement");
            return Err(PluginError::Database(
                "statement not allowed for plugins".to_string(),
            ));
        }
        if is_stacked(sql) {
            return Err(PluginError::Database(
                "multiple statements are not allowed".to_string(),
            ));
        }

        self.inner
            .as_ref()
            .ok_or_else(|| PluginError::Database("no database configured".to_string()))
    }
}

#[async_trait]
impl Database for ScopedDatabase {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PluginError> {
        let db = self.admit(sql)?;
        let _conn = self.usage.open_connection()?;
        db.query(sql, params).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, PluginError> {
        let db = self.admit(sql)?;
        let _conn = self.usage.open_connection()?;
        db.query_row(sql, params).await
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, PluginError> {
        let db = self.admit(sql)?;
        let _conn = self.usage.open_connection()?;
        db.exec(sql, params).await
    }
}
