//! SQLite-backed store handed to extensions through the scoped database façade

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::application::errors::PluginError;
use crate::domain::traits::{Database, Row};

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PluginError::Database(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path).map_err(db_error)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PluginError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PluginError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PluginError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| PluginError::lock_poisoned())?;
            f(&conn).map_err(db_error)
        })
        .await
        .map_err(|e| PluginError::Internal(format!("database task failed: {}", e)))?
    }
}

fn db_error(e: rusqlite::Error) -> PluginError {
    PluginError::Database(e.to_string())
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::from(bytes),
    }
}

fn select(conn: &Connection, sql: &str, params: Vec<SqlValue>, limit: Option<usize>) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), from_sql(row.get::<_, SqlValue>(i)?));
        }
        out.push(record);
        if limit.is_some_and(|n| out.len() >= n) {
            break;
        }
    }
    Ok(out)
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PluginError> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();
        self.with_conn(move |conn| select(conn, &sql, params, None)).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, PluginError> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();
        let rows = self
            .with_conn(move |conn| select(conn, &sql, params, Some(1)))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, PluginError> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();
        let changed = self
            .with_conn(move |conn| conn.execute(&sql, params_from_iter(params)))
            .await?;
        Ok(changed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_rows_as_json() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.exec(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, score REAL, pinned INTEGER)",
            &[],
        )
        .await
        .unwrap();
        let changed = db
            .exec(
                "INSERT INTO notes (body, score, pinned) VALUES (?1, ?2, ?3)",
                &[json!("milk"), json!(1.5), json!(true)],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let row = db
            .query_row("SELECT id, body, score, pinned FROM notes WHERE body = ?1", &[json!("milk")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["id"], json!(1));
        assert_eq!(row["body"], json!("milk"));
        assert_eq!(row["score"], json!(1.5));
        assert_eq!(row["pinned"], json!(1));

        assert!(db
            .query_row("SELECT id FROM notes WHERE body = ?1", &[json!("eggs")])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sql_errors_become_database_errors() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let err = db.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert!(matches!(err, PluginError::Database(_)));
    }

    #[tokio::test]
    async fn opens_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(dir.path().join("nested/carik.db")).unwrap();
        db.exec("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        assert!(db.query("SELECT x FROM t", &[]).await.unwrap().is_empty());
    }
}
