//! Domain entities - Messages, commands, events and the extension model

pub mod user;
pub mod message;
pub mod command;
pub mod event;
pub mod response;
pub mod permission;
pub mod manifest;
pub mod health;

pub use user::User;
pub use message::{Message, MessageType};
pub use command::{Command, CommandDefinition, CommandOption, OptionKind};
pub use event::Event;
pub use response::{Embed, EmbedField, Response, ResponseType};
pub use permission::{Permission, PermissionSet};
pub use manifest::{CommandSpec, PluginManifest, ResourceLimits, ResourceSpec};
pub use health::{HealthLevel, PluginHealth, PluginStatus};
