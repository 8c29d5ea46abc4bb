//! Contract every loaded extension satisfies
//!
//! An extension implements [`Plugin`] and advertises any of the four role
//! traits through the `as_*` accessors. The manager inspects those accessors
//! once at load time to decide which dispatch tables the extension joins.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Database, Logger, Router};
use crate::application::errors::PluginError;
use crate::application::monitor::UsageReporter;
use crate::domain::entities::{
    Command, CommandDefinition, Event, Message, PermissionSet, PluginHealth, Response,
};

/// Everything an extension receives at initialization
#[derive(Clone)]
pub struct PluginConfig {
    pub name: String,
    pub logger: Arc<dyn Logger>,
    pub database: Arc<dyn Database>,
    pub permissions: PermissionSet,
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub usage: UsageReporter,
}

impl std::fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConfig")
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Core extension trait
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once before the extension joins any dispatch table
    async fn initialize(&self, config: PluginConfig) -> Result<(), PluginError>;

    /// Release resources; called once on unload
    async fn shutdown(&self) -> Result<(), PluginError>;

    fn health(&self) -> PluginHealth;

    fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
        None
    }

    fn as_command_handler(&self) -> Option<&dyn CommandHandler> {
        None
    }

    fn as_event_listener(&self) -> Option<&dyn EventListener> {
        None
    }

    fn as_api_extension(&self) -> Option<&dyn ApiExtension> {
        None
    }
}

/// Transforms chat messages; lower priority runs first
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    fn priority(&self) -> i32;

    async fn process_message(&self, message: Message) -> Result<Message, PluginError>;
}

/// Owns one or more slash commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn commands(&self) -> Vec<CommandDefinition>;

    async fn handle_command(&self, command: Command) -> Result<Response, PluginError>;
}

/// Receives host events of the types it subscribes to
#[async_trait]
pub trait EventListener: Send + Sync {
    fn subscribed_events(&self) -> Vec<String>;

    async fn handle_event(&self, event: Event) -> Result<(), PluginError>;
}

/// Registers host-routed HTTP endpoints
pub trait ApiExtension: Send + Sync {
    fn register_routes(&self, router: &dyn Router);
}
