//! Plugin loading mechanisms
//!
//! Extensions are either compiled into the host (`builtin:<id>` entry
//! points) or shared libraries exporting `carik_plugin_create`. Both run
//! in-process; the runtime's policy checks are the isolation boundary.

pub mod loader;

pub use loader::{BuiltinLoader, CompositeLoader, NativeLoader, PluginFactory, BUILTIN_SCHEME, CREATE_SYMBOL};
