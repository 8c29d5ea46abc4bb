//! Notes plugin - per-channel notes kept in the host database

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::application::errors::PluginError;
use crate::domain::entities::{Command, CommandDefinition, Embed, Permission, PluginHealth, Response};
use crate::domain::traits::{
    ApiExtension, ApiRequest, ApiResponse, CommandHandler, Database, Plugin, PluginConfig,
    RouteFuture, Router, Row,
};

pub const NAME: &str = "notes";

const LIST_LIMIT: i64 = 20;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS plugin_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

type Store = Arc<OnceCell<Arc<dyn Database>>>;

pub struct NotesPlugin {
    db: Store,
}

impl NotesPlugin {
    pub fn new() -> Self {
        Self {
            db: Arc::new(OnceCell::new()),
        }
    }

    fn db(&self) -> Result<&Arc<dyn Database>, PluginError> {
        self.db
            .get()
            .ok_or_else(|| PluginError::execution(NAME, "not initialized"))
    }

    async fn add(&self, command: &Command) -> Result<Response, PluginError> {
        let body = command.args.get(1..).unwrap_or_default().join(" ");
        if body.trim().is_empty() {
            return Ok(Response::error("Usage: /note add <text>"));
        }
        self.db()?
            .exec(
                "INSERT INTO plugin_notes (channel_id, author, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::from(command.channel_id.as_str()),
                    Value::from(command.user.label()),
                    Value::from(body),
                    Value::from(command.issued_at.to_rfc3339()),
                ],
            )
            .await?;
        Ok(Response::message("Note saved."))
    }

    async fn list(&self, channel_id: &str) -> Result<Response, PluginError> {
        let rows = list_notes(self.db()?.as_ref(), Some(channel_id)).await?;
        if rows.is_empty() {
            return Ok(Response::message("No notes yet."));
        }
        let embed = rows.iter().fold(Embed::new().with_title("Notes"), |embed, row| {
            embed.with_field(
                format!("#{}", row.get("id").cloned().unwrap_or(Value::Null)),
                row.get("body").and_then(Value::as_str).unwrap_or_default(),
                false,
            )
        });
        Ok(Response::embed(embed))
    }

    async fn delete(&self, command: &Command) -> Result<Response, PluginError> {
        let Some(id) = command.args.get(1).and_then(|a| a.parse::<i64>().ok()) else {
            return Ok(Response::error("Usage: /note del <id>"));
        };
        let removed = self
            .db()?
            .exec(
                "DELETE FROM plugin_notes WHERE id = ?1 AND channel_id = ?2",
                &[Value::from(id), Value::from(command.channel_id.as_str())],
            )
            .await?;
        if removed == 0 {
            Ok(Response::error(format!("No note #{} in this channel.", id)))
        } else {
            Ok(Response::message(format!("Deleted note #{}.", id)))
        }
    }
}

impl Default for NotesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

async fn list_notes(
    db: &dyn Database,
    channel_id: Option<&str>,
) -> Result<Vec<Row>, PluginError> {
    match channel_id {
        Some(channel) => {
            db.query(
                "SELECT id, channel_id, author, body, created_at FROM plugin_notes \
                 WHERE channel_id = ?1 ORDER BY id DESC LIMIT ?2",
                &[Value::from(channel), Value::from(LIST_LIMIT)],
            )
            .await
        }
        None => {
            db.query(
                "SELECT id, channel_id, author, body, created_at FROM plugin_notes \
                 ORDER BY id DESC LIMIT ?1",
                &[Value::from(LIST_LIMIT)],
            )
            .await
        }
    }
}

#[async_trait]
impl Plugin for NotesPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn initialize(&self, config: PluginConfig) -> Result<(), PluginError> {
        config.database.exec(CREATE_TABLE, &[]).await?;
        // a second initialize on the same instance keeps the first handle
        let _ = self.db.set(config.database);
        config.logger.info("Notes table ready", &[]);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn health(&self) -> PluginHealth {
        if self.db.get().is_some() {
            PluginHealth::running()
        } else {
            PluginHealth::degraded("database not attached")
        }
    }

    fn as_command_handler(&self) -> Option<&dyn CommandHandler> {
        Some(self)
    }

    fn as_api_extension(&self) -> Option<&dyn ApiExtension> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for NotesPlugin {
    fn commands(&self) -> Vec<CommandDefinition> {
        vec![CommandDefinition::new("note")
            .with_description("Keep short notes for this channel")
            .with_usage("/note add <text> | /note list | /note del <id>")
            .with_aliases(vec!["notes".to_string()])
            .with_permission(Permission::AccessDb)]
    }

    async fn handle_command(&self, command: Command) -> Result<Response, PluginError> {
        match command.args.first().map(|s| s.to_lowercase()).as_deref() {
            Some("add") => self.add(&command).await,
            Some("del") | Some("delete") | Some("rm") => self.delete(&command).await,
            Some("list") | None => self.list(&command.channel_id).await,
            Some(other) => Ok(Response::error(format!("Unknown subcommand '{}'", other))),
        }
    }
}

impl ApiExtension for NotesPlugin {
    fn register_routes(&self, router: &dyn Router) {
        let store = self.db.clone();
        router.get(
            "/notes",
            Arc::new(move |req: ApiRequest| -> RouteFuture {
                let store = store.clone();
                Box::pin(async move {
                    let Some(db) = store.get().cloned() else {
                        return ApiResponse::error(503, "notes not initialized");
                    };
                    let channel = req.query.get("channel").map(String::as_str);
                    match list_notes(db.as_ref(), channel).await {
                        Ok(rows) => ApiResponse::ok(json!({ "notes": rows })),
                        Err(e) => ApiResponse::error(500, e.to_string()),
                    }
                })
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::User;
    use crate::infrastructure::database::SqliteDatabase;

    async fn ready() -> NotesPlugin {
        let plugin = NotesPlugin::new();
        let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        db.exec(CREATE_TABLE, &[]).await.unwrap();
        let _ = plugin.db.set(db);
        plugin
    }

    fn note(args: &[&str]) -> Command {
        Command::new("note", User::new("7").with_username("ana"), "general")
            .with_args(args.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn add_list_and_delete() {
        let plugin = ready().await;
        plugin.handle_command(note(&["add", "buy", "milk"])).await.unwrap();

        let listed = plugin.handle_command(note(&["list"])).await.unwrap();
        assert_eq!(listed.embeds[0].fields[0].value, "buy milk");

        let gone = plugin.handle_command(note(&["del", "1"])).await.unwrap();
        assert_eq!(gone.content, "Deleted note #1.");
        let missing = plugin.handle_command(note(&["del", "1"])).await.unwrap();
        assert_eq!(missing.content, "No note #1 in this channel.");
    }

    #[tokio::test]
    async fn commands_fail_before_initialize() {
        let plugin = NotesPlugin::new();
        assert!(plugin.handle_command(note(&["list"])).await.is_err());
        assert_eq!(plugin.health().level(), PluginHealth::degraded("x").level());
    }
}
