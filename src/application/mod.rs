//! Application layer - the extension runtime itself
//!
//! This layer contains:
//! - Errors: the runtime's error taxonomy
//! - Security: policy tiers, manifest validation, sanitization
//! - Monitor: per-extension resource accounting
//! - Events: in-process lifecycle event bus
//! - Manager: registry, lifecycle and dispatch
//! - Facades: logger and database handles given to extensions
//! - Messaging: chat text parsing

pub mod errors;
pub mod security;
pub mod monitor;
pub mod events;
pub mod manager;
pub mod facades;
pub mod messaging;
