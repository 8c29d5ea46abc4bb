//! Plugin registry - the manager's map of loaded extensions
//!
//! Dispatch paths take the read lock only long enough to copy out the
//! slots they need; hook calls happen after the guard is dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::lifecycle::LifecycleState;
use crate::application::errors::PluginError;
use crate::domain::entities::event::WILDCARD;
use crate::domain::entities::{
    CommandDefinition, HealthLevel, Permission, PermissionSet, PluginHealth, PluginManifest,
    ResourceLimits,
};
use crate::domain::traits::Plugin;

/// Which dispatch tables an extension joined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Roles {
    pub message_processor: bool,
    pub command_handler: bool,
    pub event_listener: bool,
    pub api_extension: bool,
}

impl Roles {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.message_processor {
            names.push("message_processor");
        }
        if self.command_handler {
            names.push("command_handler");
        }
        if self.event_listener {
            names.push("event_listener");
        }
        if self.api_extension {
            names.push("api_extension");
        }
        names
    }
}

/// One loaded extension
pub struct RegistryEntry {
    pub manifest: Arc<PluginManifest>,
    pub plugin: Arc<dyn Plugin>,
    pub granted: PermissionSet,
    pub limits: ResourceLimits,
    pub roles: Roles,
    pub priority: Option<i32>,
    pub commands: Vec<CommandDefinition>,
    pub subscriptions: Vec<String>,
    pub route_prefix: Option<String>,
    pub state: LifecycleState,
    pub health: PluginHealth,
    pub level: HealthLevel,
    pub consecutive_unhealthy: u32,
    pub sequence: u64,
    pub loaded_at: DateTime<Utc>,
}

/// What a dispatch path needs to call into one extension
#[derive(Clone)]
pub struct DispatchSlot {
    pub name: String,
    pub plugin: Arc<dyn Plugin>,
    pub granted: PermissionSet,
    pub priority: i32,
    pub sequence: u64,
}

/// Resolved owner of a command
#[derive(Clone)]
pub struct CommandSlot {
    pub slot: DispatchSlot,
    pub definition: CommandDefinition,
    pub required: Vec<Permission>,
}

/// Everything needed to finish tearing an extension down
pub struct UnloadTicket {
    pub plugin: Arc<dyn Plugin>,
    pub route_prefix: Option<String>,
}

/// Outcome of recording a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub consecutive_unhealthy: u32,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    // loads between reserve() and insert(), with their dependencies;
    // invisible to lookups
    reserved: HashMap<String, Vec<String>>,
    next_sequence: u64,
    closed: bool,
}

/// Registry for managing loaded extensions
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>, PluginError> {
        self.state.read().map_err(|_| PluginError::lock_poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, PluginError> {
        self.state.write().map_err(|_| PluginError::lock_poisoned())
    }

    /// Claim `name` for an in-progress load that needs `dependencies`
    pub fn reserve(&self, name: &str, dependencies: &[String]) -> Result<(), PluginError> {
        let mut state = self.write()?;
        if state.closed {
            return Err(PluginError::ShuttingDown);
        }
        if state.entries.contains_key(name) || state.reserved.contains_key(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        state.reserved.insert(name.to_string(), dependencies.to_vec());
        Ok(())
    }

    /// Refuse every later `reserve` and `insert`
    pub fn close(&self) {
        match self.state.write() {
            Ok(mut state) => state.closed = true,
            Err(_) => tracing::error!("Registry lock poisoned while closing"),
        }
    }

    /// Drop a reservation after a failed load
    pub fn release(&self, name: &str) {
        match self.state.write() {
            Ok(mut state) => {
                state.reserved.remove(name);
            }
            Err(_) => tracing::error!(plugin = %name, "Registry lock poisoned while releasing reservation"),
        }
    }

    /// Insert a fully initialized extension, consuming its reservation.
    ///
    /// Dependencies are checked again here: one may have gone away while
    /// the extension was initializing.
    pub fn insert(&self, mut entry: RegistryEntry) -> Result<u64, PluginError> {
        let mut state = self.write()?;
        let name = entry.manifest.name.clone();
        if state.closed {
            return Err(PluginError::ShuttingDown);
        }
        if state.entries.contains_key(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }
        let missing = entry.manifest.dependencies.iter().find(|d| {
            !state
                .entries
                .get(d.as_str())
                .map(|e| e.state.is_active())
                .unwrap_or(false)
        });
        if let Some(dependency) = missing {
            return Err(PluginError::MissingDependency {
                plugin: name,
                dependency: dependency.clone(),
            });
        }
        state.reserved.remove(&name);
        state.next_sequence += 1;
        entry.sequence = state.next_sequence;
        let sequence = entry.sequence;
        state.entries.insert(name, entry);
        Ok(sequence)
    }

    /// Move `name` to Unloading so dispatch stops selecting it.
    ///
    /// Unless `force` is set, refuses while other extensions depend on it.
    pub fn begin_unload(&self, name: &str, force: bool) -> Result<UnloadTicket, PluginError> {
        let mut state = self.write()?;

        if !force {
            let mut dependents: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.state != LifecycleState::Unloading)
                .filter(|e| e.manifest.dependencies.iter().any(|d| d == name))
                .map(|e| e.manifest.name.clone())
                .collect();
            dependents.extend(
                state
                    .reserved
                    .iter()
                    .filter(|(_, deps)| deps.iter().any(|d| d == name))
                    .map(|(pending, _)| pending.clone()),
            );
            if !dependents.is_empty() {
                dependents.sort();
                return Err(PluginError::DependencyInUse {
                    plugin: name.to_string(),
                    dependents,
                });
            }
        }

        let entry = state
            .entries
            .get_mut(name)
            .filter(|e| e.state.can_transition_to(LifecycleState::Unloading) && e.state != LifecycleState::Unloading)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry.state = LifecycleState::Unloading;

        Ok(UnloadTicket {
            plugin: entry.plugin.clone(),
            route_prefix: entry.route_prefix.clone(),
        })
    }

    pub fn remove(&self, name: &str) -> Option<RegistryEntry> {
        match self.state.write() {
            Ok(mut state) => state.entries.remove(name),
            Err(_) => {
                tracing::error!(plugin = %name, "Registry lock poisoned while removing plugin");
                None
            }
        }
    }

    /// Get an extension by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read().ok()?.entries.get(name).map(|e| e.plugin.clone())
    }

    /// True when `name` is loaded and initialized
    pub fn is_active(&self, name: &str) -> bool {
        self.read()
            .ok()
            .and_then(|s| s.entries.get(name).map(|e| e.state.is_active()))
            .unwrap_or(false)
    }

    /// Names in the order they were loaded
    pub fn names(&self) -> Vec<String> {
        let Ok(state) = self.read() else {
            return Vec::new();
        };
        let mut entries: Vec<(&String, u64)> = state
            .entries
            .iter()
            .map(|(name, e)| (name, e.sequence))
            .collect();
        entries.sort_by_key(|(_, seq)| *seq);
        entries.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Run `f` against the entry for `name`
    pub fn inspect<T>(&self, name: &str, f: impl FnOnce(&RegistryEntry) -> T) -> Option<T> {
        self.read().ok()?.entries.get(name).map(f)
    }

    /// Apply `f` to every entry in load order
    pub fn map_entries<T>(&self, mut f: impl FnMut(&RegistryEntry) -> T) -> Vec<T> {
        let Ok(state) = self.read() else {
            return Vec::new();
        };
        let mut entries: Vec<&RegistryEntry> = state.entries.values().collect();
        entries.sort_by_key(|e| e.sequence);
        entries.into_iter().map(|e| f(e)).collect()
    }

    fn slot(entry: &RegistryEntry) -> DispatchSlot {
        DispatchSlot {
            name: entry.manifest.name.clone(),
            plugin: entry.plugin.clone(),
            granted: entry.granted.clone(),
            priority: entry.priority.unwrap_or_default(),
            sequence: entry.sequence,
        }
    }

    /// Message processors in ascending priority, ties broken by load order
    pub fn processors(&self) -> Vec<DispatchSlot> {
        let Ok(state) = self.read() else {
            return Vec::new();
        };
        let mut slots: Vec<DispatchSlot> = state
            .entries
            .values()
            .filter(|e| e.state.is_active() && e.roles.message_processor)
            .map(Self::slot)
            .collect();
        slots.sort_by_key(|s| (s.priority, s.sequence));
        slots
    }

    /// First-registered active handler whose definitions match `command`
    pub fn command_target(&self, command: &str) -> Option<CommandSlot> {
        let state = self.read().ok()?;
        let mut handlers: Vec<&RegistryEntry> = state
            .entries
            .values()
            .filter(|e| e.state.is_active() && e.roles.command_handler)
            .collect();
        handlers.sort_by_key(|e| e.sequence);

        handlers.into_iter().find_map(|entry| {
            let definition = entry.commands.iter().find(|d| d.matches(command))?;
            let mut required = definition.permissions.clone();
            required.extend_from_slice(entry.manifest.command_permissions(&definition.name));
            required.sort();
            required.dedup();
            Some(CommandSlot {
                slot: Self::slot(entry),
                definition: definition.clone(),
                required,
            })
        })
    }

    /// Active listeners subscribed to `event_type` (or to everything)
    pub fn listeners(&self, event_type: &str) -> Vec<DispatchSlot> {
        let Ok(state) = self.read() else {
            return Vec::new();
        };
        let mut slots: Vec<DispatchSlot> = state
            .entries
            .values()
            .filter(|e| e.state.is_active() && e.roles.event_listener)
            .filter(|e| e.subscriptions.iter().any(|s| s == event_type || s == WILDCARD))
            .map(Self::slot)
            .collect();
        slots.sort_by_key(|s| s.sequence);
        slots
    }

    /// Active extensions due for a health check
    pub fn health_targets(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.map_entries(|e| (e.state.is_active(), e.manifest.name.clone(), e.plugin.clone()))
            .into_iter()
            .filter(|(active, _, _)| *active)
            .map(|(_, name, plugin)| (name, plugin))
            .collect()
    }

    /// Store a health result and move the lifecycle state accordingly
    pub fn record_health(
        &self,
        name: &str,
        health: PluginHealth,
        level: HealthLevel,
        next: LifecycleState,
    ) -> Option<HealthTransition> {
        let mut state = self.state.write().ok()?;
        let entry = state.entries.get_mut(name)?;
        let from = entry.state;
        if !from.can_transition_to(next) {
            return None;
        }

        entry.state = next;
        entry.health = health;
        entry.level = level;
        if level == HealthLevel::Unhealthy {
            entry.consecutive_unhealthy += 1;
        } else {
            entry.consecutive_unhealthy = 0;
        }

        Some(HealthTransition {
            from,
            to: next,
            consecutive_unhealthy: entry.consecutive_unhealthy,
        })
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
