//! carik-runtime - capability-gated extension runtime for chat hosts
//!
//! Layers follow the host's layout:
//! - `domain`: entities and the extension contract
//! - `application`: the extension manager, security, monitoring, events
//! - `infrastructure`: config, logging, storage, routing, loaders, adapters
//! - `plugins`: built-in extensions

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod plugins;
