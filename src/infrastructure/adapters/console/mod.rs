//! Console adapter for development/testing
//!
//! Every line typed is either a meta-command (`:plugins`, `:load <path>`,
//! ...) or chat input: commands go to the command router, everything else
//! through the message pipeline followed by a `message_create` event.

use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::errors::BotError;
use crate::application::manager::ExtensionManager;
use crate::application::messaging::{MessageParser, ParsedInput};
use crate::domain::entities::event::MESSAGE_CREATE;
use crate::domain::entities::{Event, User};
use crate::domain::traits::HttpMethod;
use crate::infrastructure::router::RouteTable;

const HELP: &str = "\
Meta commands:
  :plugins               list loaded plugins
  :health                run a health check now
  :load <path>           load a plugin directory or manifest
  :unload <name>         unload a plugin
  :event <type> [json]   emit a host event
  :routes                list API routes
  :call <METHOD> <path> [json]  call an API route
  :quit                  exit
Anything else is chat; start with / or the prefix for a command.";

/// What the console should do after a line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleOutcome {
    Reply(String),
    Quit,
}

/// Console bot adapter for local development
pub struct ConsoleAdapter {
    manager: ExtensionManager,
    parser: MessageParser,
    routes: Option<RouteTable>,
    user: User,
    channel_id: String,
}

impl ConsoleAdapter {
    pub fn new(manager: ExtensionManager, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            parser: MessageParser::new(prefix),
            routes: None,
            user: User::new("console").with_username("console"),
            channel_id: "console".to_string(),
        }
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Read stdin until EOF or `:quit`
    pub async fn run(&self) -> Result<(), BotError> {
        tracing::info!("Starting console host (dev mode), type :help for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            match self.handle_line(&line).await {
                ConsoleOutcome::Reply(text) if text.is_empty() => {}
                ConsoleOutcome::Reply(text) => println!("{}", text),
                ConsoleOutcome::Quit => break,
            }
        }
        Ok(())
    }

    pub async fn handle_line(&self, line: &str) -> ConsoleOutcome {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleOutcome::Reply(String::new());
        }
        match line.strip_prefix(':') {
            Some(meta) => self.handle_meta(meta).await,
            None => ConsoleOutcome::Reply(self.handle_chat(line).await),
        }
    }

    async fn handle_meta(&self, meta: &str) -> ConsoleOutcome {
        let (verb, rest) = meta.split_once(' ').unwrap_or((meta, ""));
        let rest = rest.trim();

        let reply = match verb {
            "quit" | "q" | "exit" => return ConsoleOutcome::Quit,
            "help" | "h" => HELP.to_string(),
            "plugins" => self.render_plugins(),
            "health" => self.render_health().await,
            "load" if !rest.is_empty() => match self.manager.load_plugin(rest).await {
                Ok(name) => format!("loaded {}", name),
                Err(e) => format!("[error] {}", e),
            },
            "unload" if !rest.is_empty() => match self.manager.unload_plugin(rest).await {
                Ok(()) => format!("unloaded {}", rest),
                Err(e) => format!("[error] {}", e),
            },
            "event" if !rest.is_empty() => self.emit(rest).await,
            "routes" => self.render_routes(),
            "call" if !rest.is_empty() => self.call_route(rest).await,
            _ => format!("unknown meta command ':{}', try :help", verb),
        };
        ConsoleOutcome::Reply(reply)
    }

    async fn handle_chat(&self, line: &str) -> String {
        match self.parser.parse(self.channel_id.as_str(), line, self.user.clone()) {
            ParsedInput::Command(command) => match self.manager.handle_command(command).await {
                Ok(response) => response.render_text(),
                Err(e) => format!("[error] {}", e),
            },
            ParsedInput::Message(message) => {
                let output = match self.manager.process_message(message).await {
                    Ok(output) => output,
                    Err(e) => return format!("[error] {}", e),
                };
                let mut text = output.message.content.clone();
                for stage in &output.errors {
                    text.push_str(&format!("\n[stage error] {}: {}", stage.plugin, stage.error));
                }

                let payload = serde_json::to_value(&output.message).unwrap_or(Value::Null);
                // listeners run in the background; the prompt does not wait
                let _ = self
                    .manager
                    .emit_event(Event::from_payload(MESSAGE_CREATE, payload))
                    .await;
                text
            }
        }
    }

    async fn emit(&self, args: &str) -> String {
        let (event_type, raw) = args.split_once(' ').unwrap_or((args, ""));
        let payload = if raw.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(raw) {
                Ok(v) => v,
                Err(e) => return format!("[error] invalid JSON payload: {}", e),
            }
        };

        let outcomes = self
            .manager
            .emit_event(Event::from_payload(event_type, payload))
            .await
            .join()
            .await;
        if outcomes.is_empty() {
            return format!("no listeners for {}", event_type);
        }
        outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(()) => format!("{}: ok", o.plugin),
                Err(e) => format!("{}: {}", o.plugin, e),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_plugins(&self) -> String {
        let plugins = self.manager.list_plugins();
        if plugins.is_empty() {
            return "no plugins loaded".to_string();
        }
        plugins
            .iter()
            .map(|p| {
                format!(
                    "{} v{} [{}] roles={} commands={} events={}",
                    p.name,
                    p.version,
                    p.state,
                    p.roles.join(","),
                    p.commands.join(","),
                    p.events.join(",")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn render_health(&self) -> String {
        let reports = self.manager.check_health().await;
        if reports.is_empty() {
            return "no plugins to check".to_string();
        }
        reports
            .iter()
            .map(|r| {
                let mut line = format!("{}: {} ({})", r.plugin, r.state, r.health.message);
                if !r.reasons.is_empty() {
                    line.push_str(&format!(" - {}", r.reasons.join("; ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_routes(&self) -> String {
        let Some(routes) = &self.routes else {
            return "no router configured".to_string();
        };
        let routes = routes.routes();
        if routes.is_empty() {
            return "no routes registered".to_string();
        }
        routes
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn call_route(&self, args: &str) -> String {
        let Some(routes) = &self.routes else {
            return "no router configured".to_string();
        };
        let mut parts = args.splitn(3, ' ');
        let method = match parts.next().unwrap_or_default().to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "PATCH" => HttpMethod::Patch,
            other => return format!("[error] unknown method '{}'", other),
        };
        let Some(path) = parts.next() else {
            return "[error] usage: :call <METHOD> <path> [json]".to_string();
        };
        let body = match parts.next().map(serde_json::from_str::<Value>) {
            None => Value::Null,
            Some(Ok(v)) => v,
            Some(Err(e)) => return format!("[error] invalid JSON body: {}", e),
        };

        let response = routes.dispatch(method, path, HashMap::new(), body).await;
        format!("{} {}", response.status, response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manager::ManagerSettings;

    fn adapter() -> ConsoleAdapter {
        ConsoleAdapter::new(ExtensionManager::new(ManagerSettings::default()), "!")
    }

    #[tokio::test]
    async fn meta_commands_without_plugins() {
        let console = adapter();
        assert_eq!(console.handle_line(":quit").await, ConsoleOutcome::Quit);
        assert_eq!(
            console.handle_line(":plugins").await,
            ConsoleOutcome::Reply("no plugins loaded".to_string())
        );
        assert_eq!(
            console.handle_line(":routes").await,
            ConsoleOutcome::Reply("no router configured".to_string())
        );
        assert!(matches!(
            console.handle_line(":bogus").await,
            ConsoleOutcome::Reply(text) if text.contains("unknown meta command")
        ));
    }

    #[tokio::test]
    async fn chat_goes_through_runtime() {
        let console = adapter();
        assert_eq!(
            console.handle_line("hello <script>x</script>world").await,
            ConsoleOutcome::Reply("hello world".to_string())
        );
        assert_eq!(
            console.handle_line("!nope").await,
            ConsoleOutcome::Reply("[error] Unknown command: nope".to_string())
        );
        assert_eq!(
            console.handle_line(":event member_join {\"user\":\"x\"}").await,
            ConsoleOutcome::Reply("no listeners for member_join".to_string())
        );
    }
}
