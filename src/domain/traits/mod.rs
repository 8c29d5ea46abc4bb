//! Domain traits - The extension contract and host collaborator façades

pub mod plugin;
pub mod logger;
pub mod database;
pub mod router;
pub mod loader;

pub use plugin::{ApiExtension, CommandHandler, EventListener, MessageProcessor, Plugin, PluginConfig};
pub use logger::{Fields, LogLevel, Logger};
pub use database::{Database, Row};
pub use router::{ApiRequest, ApiResponse, HttpMethod, RouteFuture, RouteHandler, Router};
pub use loader::PluginLoader;
