//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Logging: tracing subscriber setup
//! - Database: SQLite store behind the database façade
//! - Router: in-process route table for API extensions
//! - Plugins: built-in and native extension loaders
//! - Adapters: host front-ends (console)

pub mod config;
pub mod logging;
pub mod database;
pub mod router;
pub mod plugins;
pub mod adapters;
