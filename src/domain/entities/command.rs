use super::{Permission, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A slash command invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub options: HashMap<String, serde_json::Value>,
    pub user: User,
    pub channel_id: String,
    pub server_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(name: impl Into<String>, user: User, channel_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            options: HashMap::new(),
            user,
            channel_id: channel_id.into(),
            server_id: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Option value as a string, if present and textual
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Positional args joined back into one string
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}

/// Value type of a command option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    User,
    Channel,
}

impl Default for OptionKind {
    fn default() -> Self {
        OptionKind::String
    }
}

/// Named option accepted by a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: OptionKind,
    #[serde(default)]
    pub required: bool,
}

/// A command an extension knows how to handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub aliases: Vec<String>,
    pub options: Vec<CommandOption>,
    pub permissions: Vec<Permission>,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            usage: None,
            aliases: Vec::new(),
            options: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Case-insensitive match against the name or any alias
    pub fn matches(&self, input: &str) -> bool {
        self.name.eq_ignore_ascii_case(input)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(input))
    }
}
