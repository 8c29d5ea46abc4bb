//! Contract for turning a manifest's entry point into a live extension

use std::path::Path;
use std::sync::Arc;

use super::Plugin;
use crate::application::errors::PluginError;
use crate::domain::entities::PluginManifest;

/// Produces an uninitialized extension instance for a manifest.
///
/// `base_dir` is the directory the manifest was read from; relative entry
/// points resolve against it.
pub trait PluginLoader: Send + Sync {
    /// True when this loader understands `entry_point`
    fn supports(&self, entry_point: &str) -> bool;

    fn load(&self, manifest: &PluginManifest, base_dir: &Path) -> Result<Arc<dyn Plugin>, PluginError>;
}
