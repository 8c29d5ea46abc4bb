//! Plugin loaders - resolve a manifest's entry point to an instance

use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::errors::PluginError;
use crate::domain::entities::{PluginHealth, PluginManifest};
use crate::domain::traits::{
    ApiExtension, CommandHandler, EventListener, MessageProcessor, Plugin, PluginConfig,
    PluginLoader,
};

/// Entry point scheme for extensions compiled into the host
pub const BUILTIN_SCHEME: &str = "builtin:";

/// Symbol a native extension library must export
pub const CREATE_SYMBOL: &[u8] = b"carik_plugin_create";

/// Constructor exported by native extensions; the pointer comes from
/// `Box::into_raw(Box::new(boxed_plugin))`
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut Box<dyn Plugin>;

/// Builds a fresh instance of a built-in extension
pub type PluginFactory = Arc<dyn Fn(&PluginManifest) -> Arc<dyn Plugin> + Send + Sync>;

/// Resolves `builtin:<id>` entry points against registered factories
#[derive(Default, Clone)]
pub struct BuiltinLoader {
    factories: HashMap<String, PluginFactory>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(id.into(), factory);
    }

    pub fn with(mut self, id: impl Into<String>, factory: PluginFactory) -> Self {
        self.register(id, factory);
        self
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl PluginLoader for BuiltinLoader {
    fn supports(&self, entry_point: &str) -> bool {
        entry_point.starts_with(BUILTIN_SCHEME)
    }

    fn load(&self, manifest: &PluginManifest, _base_dir: &Path) -> Result<Arc<dyn Plugin>, PluginError> {
        let id = manifest
            .entry_point
            .strip_prefix(BUILTIN_SCHEME)
            .ok_or_else(|| PluginError::Load(format!("not a builtin entry point: {}", manifest.entry_point)))?;
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| PluginError::Load(format!("unknown builtin plugin '{}'", id)))?;
        Ok(factory(manifest))
    }
}

/// Native extension plus the library its code lives in.
///
/// Field order matters: the instance must drop before the library unmaps.
struct NativePlugin {
    instance: Arc<dyn Plugin>,
    _library: Arc<Library>,
}

#[async_trait]
impl Plugin for NativePlugin {
    fn name(&self) -> &str {
        self.instance.name()
    }

    fn version(&self) -> &str {
        self.instance.version()
    }

    async fn initialize(&self, config: PluginConfig) -> Result<(), PluginError> {
        self.instance.initialize(config).await
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.instance.shutdown().await
    }

    fn health(&self) -> PluginHealth {
        self.instance.health()
    }

    fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
        self.instance.as_message_processor()
    }

    fn as_command_handler(&self) -> Option<&dyn CommandHandler> {
        self.instance.as_command_handler()
    }

    fn as_event_listener(&self) -> Option<&dyn EventListener> {
        self.instance.as_event_listener()
    }

    fn as_api_extension(&self) -> Option<&dyn ApiExtension> {
        self.instance.as_api_extension()
    }
}

/// Loads extensions from shared libraries next to their manifest
#[derive(Debug, Default, Clone)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }

    fn library_path(manifest: &PluginManifest, base_dir: &Path) -> PathBuf {
        let entry = Path::new(&manifest.entry_point);
        if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            base_dir.join(entry)
        }
    }
}

impl PluginLoader for NativeLoader {
    fn supports(&self, entry_point: &str) -> bool {
        !entry_point.starts_with(BUILTIN_SCHEME)
    }

    fn load(&self, manifest: &PluginManifest, base_dir: &Path) -> Result<Arc<dyn Plugin>, PluginError> {
        let library_path = Self::library_path(manifest, base_dir);
        if !library_path.is_file() {
            return Err(PluginError::Load(format!("Library not found: {}", library_path.display())));
        }

        // SAFETY: loading runs the library's initializers; the manifest
        // already passed policy validation before we get here.
        let library = unsafe {
            Library::new(&library_path)
                .map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))?
        };

        let instance = unsafe {
            let create: Symbol<PluginCreateFn> = library
                .get(CREATE_SYMBOL)
                .map_err(|e| PluginError::Load(format!("Failed to find create function: {}", e)))?;
            let raw = create();
            if raw.is_null() {
                return Err(PluginError::Load("Plugin create function returned null".to_string()));
            }
            let boxed: Box<Box<dyn Plugin>> = Box::from_raw(raw);
            Arc::<dyn Plugin>::from(*boxed)
        };

        tracing::info!(
            plugin = %manifest.name,
            "Loaded native plugin from {}",
            library_path.display()
        );

        Ok(Arc::new(NativePlugin {
            instance,
            _library: Arc::new(library),
        }))
    }
}

/// Tries each loader in order and uses the first that supports the entry point
#[derive(Default, Clone)]
pub struct CompositeLoader {
    loaders: Vec<Arc<dyn PluginLoader>>,
}

impl CompositeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.push(loader);
        self
    }
}

impl PluginLoader for CompositeLoader {
    fn supports(&self, entry_point: &str) -> bool {
        self.loaders.iter().any(|l| l.supports(entry_point))
    }

    fn load(&self, manifest: &PluginManifest, base_dir: &Path) -> Result<Arc<dyn Plugin>, PluginError> {
        self.loaders
            .iter()
            .find(|l| l.supports(&manifest.entry_point))
            .ok_or_else(|| PluginError::Load(format!("No loader for entry point '{}'", manifest.entry_point)))?
            .load(manifest, base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(String);

    #[async_trait]
    impl Plugin for Stub {
        fn name(&self) -> &str {
            &self.0
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        async fn initialize(&self, _config: PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn health(&self) -> PluginHealth {
            PluginHealth::running()
        }
    }

    fn manifest(entry: &str) -> PluginManifest {
        PluginManifest::from_yaml(&format!("name: stub\nversion: '1'\nentry_point: '{}'\n", entry)).unwrap()
    }

    #[test]
    fn builtin_resolves_registered_factories() {
        let loader = BuiltinLoader::new().with(
            "stub",
            Arc::new(|m: &PluginManifest| Arc::new(Stub(m.name.clone())) as Arc<dyn Plugin>),
        );
        let plugin = loader.load(&manifest("builtin:stub"), Path::new(".")).unwrap();
        assert_eq!(plugin.name(), "stub");
        assert!(matches!(
            loader.load(&manifest("builtin:other"), Path::new(".")),
            Err(PluginError::Load(_))
        ));
        assert_eq!(loader.ids(), vec!["stub"]);
    }

    #[test]
    fn composite_routes_by_scheme() {
        let composite = CompositeLoader::new()
            .with(Arc::new(BuiltinLoader::new()))
            .with(Arc::new(NativeLoader::new()));
        assert!(composite.supports("builtin:x"));
        assert!(composite.supports("libx.so"));

        let dir = tempfile::tempdir().unwrap();
        let err = composite.load(&manifest("libmissing.so"), dir.path()).err().expect("expected load error");
        assert!(err.to_string().contains("Library not found"));
    }
}
