//! Message parser - turns raw chat text into a message or a command

use serde_json::Value;

use crate::domain::entities::{Command, Message, User};

/// What a line of chat text turned out to be
#[derive(Debug, Clone)]
pub enum ParsedInput {
    Message(Message),
    Command(Command),
}

/// Parses incoming text; anything starting with `/` or the configured
/// prefix is a command
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message
    pub fn parse(
        &self,
        channel_id: impl Into<String>,
        text: impl Into<String>,
        author: User,
    ) -> ParsedInput {
        let text = text.into();
        let channel_id = channel_id.into();

        match self.strip_prefix(&text) {
            Some(body) if !body.trim().is_empty() => {
                ParsedInput::Command(Self::parse_command(channel_id, body, author))
            }
            _ => ParsedInput::Message(Message::new(channel_id, author, text)),
        }
    }

    fn strip_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        if let Some(rest) = text.strip_prefix('/') {
            return Some(rest);
        }
        if self.command_prefix.is_empty() {
            return None;
        }
        text.strip_prefix(self.command_prefix.as_str())
    }

    /// `name arg1 --key=value arg2` - `--key=value` and `--flag` become options
    fn parse_command(channel_id: String, body: &str, author: User) -> Command {
        let mut parts = body.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let mut command = Command::new(name, author, channel_id);

        let mut args = Vec::new();
        for part in parts {
            match part.strip_prefix("--") {
                Some(option) if !option.is_empty() => {
                    let (key, value) = match option.split_once('=') {
                        Some((key, raw)) => (key, parse_option_value(raw)),
                        None => (option, Value::Bool(true)),
                    };
                    command = command.with_option(key, value);
                }
                _ => args.push(part.to_string()),
            }
        }
        command.with_args(args)
    }
}

fn parse_option_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(raw),
    }
}
