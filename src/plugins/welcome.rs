//! Welcome plugin - greets new members and answers `/welcome`

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::application::errors::PluginError;
use crate::domain::entities::event::MEMBER_JOIN;
use crate::domain::entities::{
    Command, CommandDefinition, Embed, Event, Permission, PluginHealth, Response,
};
use crate::domain::traits::{CommandHandler, EventListener, Logger, Plugin, PluginConfig};

pub const NAME: &str = "welcome";

const DEFAULT_GREETING: &str = "Welcome, {user}!";
const RECENT_LIMIT: usize = 10;

#[derive(Default)]
struct State {
    greeting: Option<String>,
    recent: VecDeque<String>,
    logger: Option<Arc<dyn Logger>>,
}

pub struct WelcomePlugin {
    state: RwLock<State>,
}

impl WelcomePlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn greeting_for(&self, user: &str) -> String {
        let template = self
            .state
            .read()
            .ok()
            .and_then(|s| s.greeting.clone())
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());
        template.replace("{user}", user)
    }

    pub fn recent_members(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.recent.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for WelcomePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for WelcomePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn initialize(&self, config: PluginConfig) -> Result<(), PluginError> {
        let greeting = config
            .settings
            .get("greeting")
            .and_then(Value::as_str)
            .map(String::from);
        let mut state = self.state.write().map_err(|_| PluginError::lock_poisoned())?;
        state.greeting = greeting;
        state.logger = Some(config.logger);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Ok(mut state) = self.state.write() {
            state.recent.clear();
            state.logger = None;
        }
        Ok(())
    }

    fn health(&self) -> PluginHealth {
        PluginHealth::running().with_detail("recent_members", self.recent_members().len())
    }

    fn as_command_handler(&self) -> Option<&dyn CommandHandler> {
        Some(self)
    }

    fn as_event_listener(&self) -> Option<&dyn EventListener> {
        Some(self)
    }
}

#[async_trait]
impl CommandHandler for WelcomePlugin {
    fn commands(&self) -> Vec<CommandDefinition> {
        vec![CommandDefinition::new("welcome")
            .with_description("Show the greeting and recently joined members")
            .with_usage("/welcome [name]")
            .with_aliases(vec!["greet".to_string()])
            .with_permission(Permission::WriteMessages)]
    }

    async fn handle_command(&self, command: Command) -> Result<Response, PluginError> {
        if let Some(name) = command.args.first() {
            return Ok(Response::message(self.greeting_for(name)));
        }

        let recent = self.recent_members();
        let mut embed = Embed::new()
            .with_title("Welcome")
            .with_description(self.greeting_for(command.user.label()));
        if !recent.is_empty() {
            embed = embed.with_field("Recently joined", recent.join(", "), false);
        }
        Ok(Response::embed(embed))
    }
}

#[async_trait]
impl EventListener for WelcomePlugin {
    fn subscribed_events(&self) -> Vec<String> {
        vec![MEMBER_JOIN.to_string()]
    }

    async fn handle_event(&self, event: Event) -> Result<(), PluginError> {
        let user = event
            .get_str("username")
            .or_else(|| event.get_str("user"))
            .ok_or_else(|| PluginError::execution(NAME, "member_join event without a user"))?
            .to_string();
        let greeting = self.greeting_for(&user);

        let logger = {
            let mut state = self.state.write().map_err(|_| PluginError::lock_poisoned())?;
            state.recent.push_front(user.clone());
            state.recent.truncate(RECENT_LIMIT);
            state.logger.clone()
        };
        if let Some(logger) = logger {
            logger.info(&greeting, &[("user", Value::from(user))]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::User;

    #[tokio::test]
    async fn records_members_and_greets() {
        let plugin = WelcomePlugin::new();
        plugin
            .handle_event(Event::new(MEMBER_JOIN).with_data("user", "ana"))
            .await
            .unwrap();
        assert_eq!(plugin.recent_members(), vec!["ana".to_string()]);

        let resp = plugin
            .handle_command(Command::new("welcome", User::new("1"), "c").with_args(vec!["bo".into()]))
            .await
            .unwrap();
        assert_eq!(resp.content, "Welcome, bo!");

        assert!(plugin.handle_event(Event::new(MEMBER_JOIN)).await.is_err());
    }
}
