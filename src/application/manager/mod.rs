//! Extension manager - owns the registry and drives the plugin lifecycle
//!
//! Load and unload take the registry write lock only for the map mutation;
//! `initialize` and `shutdown` hooks run outside of it under their own
//! deadlines. Dispatch lives in `dispatch.rs`, the health loop in `health.rs`.

pub mod lifecycle;
pub mod registry;
mod dispatch;
mod health;

pub use dispatch::{EventDispatch, ListenerOutcome, PipelineOutput, StageError};
pub use health::HealthReport;
pub use lifecycle::LifecycleState;
pub use registry::{PluginRegistry, Roles};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::errors::PluginError;
use crate::application::events::EventBus;
use crate::application::facades::{ScopedDatabase, ScopedLogger};
use crate::application::monitor::{ResourceMonitor, ResourceSample};
use crate::application::security::SecurityManager;
use crate::domain::entities::event::{PLUGIN_ERRORED, PLUGIN_LOADED, PLUGIN_UNLOADED, WILDCARD};
use crate::domain::entities::manifest::MANIFEST_FILE_NAMES;
use crate::domain::entities::{
    Event, HealthLevel, Permission, PermissionSet, PluginHealth, PluginManifest, PluginStatus,
    ResourceLimits,
};
use crate::domain::traits::{Database, Plugin, PluginConfig, PluginLoader, Router};
use registry::RegistryEntry;

/// Runtime knobs for the manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub init_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub command_timeout: Duration,
    pub event_timeout: Duration,
    pub message_timeout: Duration,
    pub health_interval: Duration,
    /// Upper bound on listener tasks in flight across all events
    pub max_concurrent_events: usize,
    pub event_bus_capacity: usize,
    /// Unload an extension after this many consecutive unhealthy checks
    pub unload_after_unhealthy_checks: Option<u32>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            event_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            max_concurrent_events: 64,
            event_bus_capacity: 256,
            unload_after_unhealthy_checks: None,
        }
    }
}

/// Operator-facing view of one loaded extension
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub state: LifecycleState,
    pub status: PluginStatus,
    pub level: HealthLevel,
    pub health: PluginHealth,
    pub roles: Vec<&'static str>,
    pub priority: Option<i32>,
    pub commands: Vec<String>,
    pub events: Vec<String>,
    pub permissions: PermissionSet,
    pub limits: ResourceLimits,
    pub loaded_at: DateTime<Utc>,
    pub usage: Option<ResourceSample>,
}

/// Result of loading a whole plugins directory
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, PluginError)>,
}

struct ManagerInner {
    settings: ManagerSettings,
    security: Arc<SecurityManager>,
    monitor: ResourceMonitor,
    bus: EventBus,
    registry: PluginRegistry,
    loader: Option<Arc<dyn PluginLoader>>,
    database: Option<Arc<dyn Database>>,
    router: Option<Arc<dyn Router>>,
    event_slots: Arc<Semaphore>,
    root: CancellationToken,
}

/// Where a new extension instance comes from
enum Source<'a> {
    Loader(&'a Path),
    Instance(Arc<dyn Plugin>),
}

/// Builder for [`ExtensionManager`]
pub struct ManagerBuilder {
    settings: ManagerSettings,
    security: Option<SecurityManager>,
    loader: Option<Arc<dyn PluginLoader>>,
    database: Option<Arc<dyn Database>>,
    router: Option<Arc<dyn Router>>,
}

impl ManagerBuilder {
    pub fn with_security(mut self, security: SecurityManager) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn build(self) -> ExtensionManager {
        let settings = self.settings;
        let inner = ManagerInner {
            security: Arc::new(self.security.unwrap_or_default()),
            monitor: ResourceMonitor::new(),
            bus: EventBus::new(settings.event_bus_capacity),
            registry: PluginRegistry::new(),
            loader: self.loader,
            database: self.database,
            router: self.router,
            event_slots: Arc::new(Semaphore::new(settings.max_concurrent_events.max(1))),
            root: CancellationToken::new(),
            settings,
        };
        ExtensionManager {
            inner: Arc::new(inner),
        }
    }
}

/// Owns every loaded extension; cheap to clone and share between host tasks
#[derive(Clone)]
pub struct ExtensionManager {
    inner: Arc<ManagerInner>,
}

impl ExtensionManager {
    pub fn new(settings: ManagerSettings) -> Self {
        Self::builder(settings).build()
    }

    pub fn builder(settings: ManagerSettings) -> ManagerBuilder {
        ManagerBuilder {
            settings,
            security: None,
            loader: None,
            database: None,
            router: None,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn security(&self) -> &SecurityManager {
        &self.inner.security
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.inner.monitor
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Lifecycle notifications (`plugin.loaded`, ...); `"*"` receives all of them
    pub fn subscribe(&self, event_type: &str) -> mpsc::Receiver<Event> {
        self.inner.bus.subscribe(event_type)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    fn ensure_running(&self) -> Result<(), PluginError> {
        if self.inner.root.is_cancelled() {
            return Err(PluginError::ShuttingDown);
        }
        Ok(())
    }

    /// Load the extension whose manifest is at `path` (a directory or the manifest file)
    pub async fn load_plugin(&self, path: impl AsRef<Path>) -> Result<String, PluginError> {
        let (manifest, base_dir) = PluginManifest::from_path(path.as_ref())?;
        self.install(manifest, Source::Loader(&base_dir)).await
    }

    /// Load an already constructed extension under `manifest`
    pub async fn register_plugin(
        &self,
        manifest: PluginManifest,
        plugin: Arc<dyn Plugin>,
    ) -> Result<String, PluginError> {
        self.install(manifest, Source::Instance(plugin)).await
    }

    async fn install(&self, manifest: PluginManifest, source: Source<'_>) -> Result<String, PluginError> {
        self.ensure_running()?;
        let limits = self.inner.security.validate_manifest(&manifest)?;
        let name = manifest.name.clone();
        self.inner.registry.reserve(&name, &manifest.dependencies)?;

        match self.install_reserved(manifest, limits, source).await {
            Ok(()) => Ok(name),
            Err(e) => {
                self.inner.registry.release(&name);
                if let Err(err) = self.inner.monitor.unregister_plugin(&name) {
                    warn!(plugin = %name, error = %err, "Failed to release resource accounting");
                }
                warn!(plugin = %name, code = e.code(), "Failed to load plugin: {}", e);
                if let PluginError::InitializationFailed { reason, .. } = &e {
                    self.inner.bus.emit(
                        Event::new(PLUGIN_ERRORED)
                            .with_data("plugin", name.as_str())
                            .with_data("code", e.code())
                            .with_data("message", reason.as_str()),
                    );
                }
                Err(e)
            }
        }
    }

    async fn install_reserved(
        &self,
        manifest: PluginManifest,
        limits: ResourceLimits,
        source: Source<'_>,
    ) -> Result<(), PluginError> {
        let inner = &self.inner;
        let name = manifest.name.clone();

        for dependency in &manifest.dependencies {
            if !inner.registry.is_active(dependency) {
                return Err(PluginError::MissingDependency {
                    plugin: name,
                    dependency: dependency.clone(),
                });
            }
        }

        let plugin = match source {
            Source::Instance(plugin) => plugin,
            Source::Loader(base_dir) => {
                let loader = inner
                    .loader
                    .as_ref()
                    .ok_or_else(|| PluginError::Load("no plugin loader configured".to_string()))?;
                loader.load(&manifest, base_dir)?
            }
        };
        if plugin.name() != name {
            warn!(plugin = %name, instance = plugin.name(), "Instance name differs from manifest; using manifest name");
        }

        let granted = manifest.permission_set();
        let roles = Roles {
            message_processor: plugin.as_message_processor().is_some(),
            command_handler: plugin.as_command_handler().is_some(),
            event_listener: plugin.as_event_listener().is_some(),
            api_extension: plugin.as_api_extension().is_some(),
        };
        if roles.message_processor && !granted.contains(Permission::ReadMessages) {
            return Err(PluginError::permission_denied(&name, Permission::ReadMessages));
        }

        let usage = inner.monitor.register_plugin(&name, limits.clone())?;
        let config = PluginConfig {
            name: name.clone(),
            logger: Arc::new(ScopedLogger::new(&name)),
            database: Arc::new(ScopedDatabase::new(
                &name,
                inner.database.clone(),
                granted.clone(),
                inner.security.clone(),
                usage.clone(),
            )),
            permissions: granted.clone(),
            settings: manifest.config.clone(),
            usage,
        };

        debug!(plugin = %name, "Initializing plugin");
        let init_timeout = inner.settings.init_timeout;
        match bounded(&name, "initialize", init_timeout, Some(&inner.root), plugin.initialize(config)).await {
            Ok(()) => {}
            Err(PluginError::Cancelled) => return Err(PluginError::ShuttingDown),
            Err(PluginError::Timeout { after, .. }) => {
                return Err(PluginError::InitializationFailed {
                    plugin: name,
                    reason: format!("timed out after {:?}", after),
                })
            }
            Err(e) => {
                return Err(PluginError::InitializationFailed {
                    plugin: name,
                    reason: e.to_string(),
                })
            }
        }

        let priority = plugin.as_message_processor().map(|p| p.priority());
        let commands = plugin
            .as_command_handler()
            .map(|h| h.commands())
            .unwrap_or_default();
        for command in &commands {
            if !manifest.commands.is_empty() && !manifest.commands.iter().any(|c| command.matches(&c.name)) {
                warn!(plugin = %name, command = %command.name, "Command not declared in manifest");
            }
        }
        let subscriptions = plugin
            .as_event_listener()
            .map(|l| effective_subscriptions(&manifest.events, l.subscribed_events()))
            .unwrap_or_default();

        let route_prefix = match (plugin.as_api_extension(), &inner.router) {
            (Some(api), Some(router)) => {
                let prefix = format!("/plugins/{}", name);
                let group = router.group(&prefix);
                api.register_routes(group.as_ref());
                Some(prefix)
            }
            (Some(_), None) => {
                warn!(plugin = %name, "No router configured, API routes skipped");
                None
            }
            _ => None,
        };

        let version = manifest.version.clone();
        let instance = plugin.clone();
        let routes = route_prefix.clone();
        let entry = RegistryEntry {
            manifest: Arc::new(manifest),
            plugin,
            granted,
            limits,
            roles,
            priority,
            commands,
            subscriptions,
            route_prefix,
            state: LifecycleState::Running,
            health: PluginHealth::running(),
            level: HealthLevel::Healthy,
            consecutive_unhealthy: 0,
            sequence: 0,
            loaded_at: Utc::now(),
        };
        // the registry refuses once shutdown has begun or a dependency left
        if let Err(e) = inner.registry.insert(entry) {
            self.abandon(&name, instance, routes.as_deref()).await;
            return Err(e);
        }

        inner.bus.emit(
            Event::new(PLUGIN_LOADED)
                .with_data("plugin", name.as_str())
                .with_data("version", version.as_str()),
        );
        info!(plugin = %name, version = %version, roles = ?roles.names(), "Plugin loaded");
        Ok(())
    }

    /// Undo an initialized extension that never made it into the registry
    async fn abandon(&self, name: &str, plugin: Arc<dyn Plugin>, route_prefix: Option<&str>) {
        let inner = &self.inner;
        if let (Some(prefix), Some(router)) = (route_prefix, &inner.router) {
            router.remove_group(prefix);
        }
        if let Err(e) = bounded(name, "shutdown", inner.settings.shutdown_timeout, None, plugin.shutdown()).await {
            warn!(plugin = %name, code = e.code(), "Abandoned plugin failed to shut down: {}", e);
        }
    }

    /// Load every extension directory under `dir`.
    ///
    /// Extensions waiting on a dependency are retried until a pass makes no
    /// progress; individual failures are logged and collected.
    pub async fn load_all(&self, dir: impl AsRef<Path>) -> Result<LoadSummary, PluginError> {
        let dir = dir.as_ref();
        let mut summary = LoadSummary::default();
        if !dir.exists() {
            warn!("Plugin directory does not exist: {}", dir.display());
            return Ok(summary);
        }

        let mut pending = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| PluginError::Load(format!("Failed to read plugin directory: {}", e)))?;
        for entry in entries {
            let path = match entry {
                Ok(e) => e.path(),
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true);
            if path.is_dir() && !hidden && MANIFEST_FILE_NAMES.iter().any(|f| path.join(f).is_file()) {
                pending.push(path);
            }
        }
        pending.sort();

        loop {
            let mut progressed = false;
            let mut deferred = Vec::new();
            for path in pending {
                match self.load_plugin(&path).await {
                    Ok(name) => {
                        progressed = true;
                        summary.loaded.push(name);
                    }
                    Err(e @ PluginError::MissingDependency { .. }) => deferred.push((path, e)),
                    Err(e) => summary.failed.push((path, e)),
                }
            }
            if deferred.is_empty() {
                break;
            }
            if !progressed {
                summary.failed.extend(deferred);
                break;
            }
            pending = deferred.into_iter().map(|(path, _)| path).collect();
        }

        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            "Loaded plugins from {}",
            dir.display()
        );
        Ok(summary)
    }

    /// Unload `name`. A failing `shutdown` hook is logged but does not fail the unload.
    pub async fn unload_plugin(&self, name: &str) -> Result<(), PluginError> {
        if let Some(e) = self.teardown(name, false).await? {
            warn!(plugin = %name, code = e.code(), "Plugin shutdown reported an error: {}", e);
        }
        Ok(())
    }

    /// Remove `name` from every table; returns the shutdown hook's error, if any
    async fn teardown(&self, name: &str, force: bool) -> Result<Option<PluginError>, PluginError> {
        let inner = &self.inner;
        let ticket = inner.registry.begin_unload(name, force)?;
        debug!(plugin = %name, "Unloading plugin");

        let hook_error = match bounded(
            name,
            "shutdown",
            inner.settings.shutdown_timeout,
            None,
            ticket.plugin.shutdown(),
        )
        .await
        {
            Ok(()) => None,
            Err(PluginError::Timeout { after, .. }) => Some(PluginError::ShutdownFailed {
                plugin: name.to_string(),
                reason: format!("timed out after {:?}", after),
            }),
            Err(e) => Some(PluginError::ShutdownFailed {
                plugin: name.to_string(),
                reason: e.to_string(),
            }),
        };

        if let (Some(prefix), Some(router)) = (&ticket.route_prefix, &inner.router) {
            router.remove_group(prefix);
        }
        if let Err(e) = inner.monitor.unregister_plugin(name) {
            warn!(plugin = %name, error = %e, "Failed to release resource accounting");
        }
        inner.registry.remove(name);
        inner
            .bus
            .emit(Event::new(PLUGIN_UNLOADED).with_data("plugin", name));
        info!(plugin = %name, "Plugin unloaded");

        Ok(hook_error)
    }

    /// Unload everything in reverse load order and stop accepting work.
    ///
    /// Every extension is attempted; failures come back together as
    /// `PluginError::Aggregate`.
    pub async fn shutdown(&self) -> Result<(), PluginError> {
        info!("Shutting down extension manager");
        self.inner.root.cancel();
        self.inner.event_slots.close();
        // loads finishing after this point are abandoned, not missed below
        self.inner.registry.close();

        let mut errors = Vec::new();
        for name in self.inner.registry.names().into_iter().rev() {
            match self.teardown(&name, true).await {
                Ok(None) | Err(PluginError::NotFound(_)) => {}
                Ok(Some(e)) | Err(e) => {
                    warn!(plugin = %name, code = e.code(), "Error during shutdown: {}", e);
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Aggregate(errors))
        }
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.inner.registry.get(name)
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        let mut info = self.inner.registry.inspect(name, describe)?;
        info.usage = self.inner.monitor.peek(name);
        Some(info)
    }

    /// Every loaded extension, in load order
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        let mut infos = self.inner.registry.map_entries(describe);
        for info in &mut infos {
            info.usage = self.inner.monitor.peek(&info.name);
        }
        infos
    }

    pub fn plugin_count(&self) -> usize {
        self.inner.registry.len()
    }
}

fn describe(entry: &RegistryEntry) -> PluginInfo {
    PluginInfo {
        name: entry.manifest.name.clone(),
        version: entry.manifest.version.clone(),
        description: entry.manifest.description.clone(),
        author: entry.manifest.author.clone(),
        state: entry.state,
        status: entry.health.status,
        level: entry.level,
        health: entry.health.clone(),
        roles: entry.roles.names(),
        priority: entry.priority,
        commands: entry.commands.iter().map(|c| c.name.clone()).collect(),
        events: entry.subscriptions.clone(),
        permissions: entry.granted.clone(),
        limits: entry.limits.clone(),
        loaded_at: entry.loaded_at,
        usage: None,
    }
}

/// Subscriptions a listener actually gets: what it asks for, narrowed to
/// the manifest's `events` when that list is non-empty.
fn effective_subscriptions(declared: &[String], requested: Vec<String>) -> Vec<String> {
    let mut events: Vec<String> = if declared.is_empty() || declared.iter().any(|e| e == WILDCARD) {
        requested
    } else if requested.iter().any(|e| e == WILDCARD) {
        declared.to_vec()
    } else {
        requested
            .into_iter()
            .filter(|e| declared.contains(e))
            .collect()
    };
    events.sort();
    events.dedup();
    events
}

/// Run `fut` under a deadline, optionally also racing `cancel`
pub(crate) async fn bounded<T, F>(
    plugin: &str,
    operation: &str,
    after: Duration,
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    let timed = tokio::time::timeout(after, fut);
    let outcome = match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PluginError::Cancelled),
            outcome = timed => outcome,
        },
        None => timed.await,
    };
    outcome.unwrap_or_else(|_| {
        Err(PluginError::Timeout {
            plugin: plugin.to_string(),
            operation: operation.to_string(),
            after,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn subscriptions_are_narrowed_by_manifest() {
        assert_eq!(
            effective_subscriptions(&[], strings(&["b", "a", "a"])),
            strings(&["a", "b"])
        );
        assert_eq!(
            effective_subscriptions(&strings(&["a"]), strings(&["a", "b"])),
            strings(&["a"])
        );
        assert_eq!(
            effective_subscriptions(&strings(&["x", "y"]), strings(&["*"])),
            strings(&["x", "y"])
        );
        assert_eq!(
            effective_subscriptions(&strings(&["*"]), strings(&["z"])),
            strings(&["z"])
        );
    }

    #[tokio::test]
    async fn bounded_times_out_and_cancels() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), PluginError>(())
        };
        let err = bounded("p", "handle_event", Duration::from_millis(10), None, slow)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout { ref operation, .. } if operation == "handle_event"));

        let token = CancellationToken::new();
        token.cancel();
        let never = std::future::pending::<Result<(), PluginError>>();
        let err = bounded("p", "x", Duration::from_secs(5), Some(&token), never)
            .await
            .unwrap_err();
        assert_eq!(err, PluginError::Cancelled);
    }
}
