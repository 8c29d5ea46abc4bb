//! Built-in extensions shipped with carik-bot
//!
//! Each one is addressed from a manifest as `builtin:<name>`.

pub mod moderation;
pub mod notes;
pub mod welcome;

use std::sync::Arc;

use crate::domain::entities::PluginManifest;
use crate::domain::traits::Plugin;
use crate::infrastructure::plugins::BuiltinLoader;

pub use moderation::ModerationPlugin;
pub use notes::NotesPlugin;
pub use welcome::WelcomePlugin;

/// Loader that knows every built-in extension
pub fn builtin_loader() -> BuiltinLoader {
    BuiltinLoader::new()
        .with(
            moderation::NAME,
            Arc::new(|_: &PluginManifest| Arc::new(ModerationPlugin::new()) as Arc<dyn Plugin>),
        )
        .with(
            welcome::NAME,
            Arc::new(|_: &PluginManifest| Arc::new(WelcomePlugin::new()) as Arc<dyn Plugin>),
        )
        .with(
            notes::NAME,
            Arc::new(|_: &PluginManifest| Arc::new(NotesPlugin::new()) as Arc<dyn Plugin>),
        )
}
