use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::application::errors::PluginError;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Database façade - abstraction over the host's persistent store
#[async_trait]
pub trait Database: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PluginError>;

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, PluginError>;

    /// Execute a statement, returning the number of affected rows
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, PluginError>;
}
