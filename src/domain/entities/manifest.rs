//! Extension manifest definition

use super::{CommandOption, Permission, PermissionSet};
use crate::application::errors::PluginError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names probed when a manifest path points at a directory
pub const MANIFEST_FILE_NAMES: [&str; 2] = ["plugin.yaml", "plugin.yml"];

/// Extension metadata, parsed from `plugin.yaml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginManifest {
    /// Extension name (required, unique per manager)
    pub name: String,

    /// Extension version (required)
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Declared capabilities; the ceiling for everything requested at runtime
    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// Names of extensions that must be loaded first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// `builtin:<id>` or a shared library path relative to the manifest
    pub entry_point: String,

    #[serde(default)]
    pub resources: ResourceSpec,

    #[serde(default)]
    pub commands: Vec<CommandSpec>,

    #[serde(default)]
    pub events: Vec<String>,

    /// Free-form settings handed to the extension at initialization
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Command surface declared in the manifest
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Resource limits as written in a manifest; any field may be omitted
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
    #[serde(default, with = "optional_duration")]
    pub max_execution_time: Option<Duration>,
    #[serde(default)]
    pub max_goroutines: Option<u32>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl ResourceSpec {
    /// Fill omitted fields from `defaults`
    pub fn resolve(&self, defaults: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            max_memory_mb: self.max_memory_mb.unwrap_or(defaults.max_memory_mb),
            max_cpu_percent: self.max_cpu_percent.unwrap_or(defaults.max_cpu_percent),
            max_execution_time: self.max_execution_time.unwrap_or(defaults.max_execution_time),
            max_goroutines: self.max_goroutines.unwrap_or(defaults.max_goroutines),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
        }
    }
}

/// Fully-resolved resource limits for a loaded extension
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
    #[serde(with = "duration")]
    pub max_execution_time: Duration,
    pub max_goroutines: u32,
    pub max_connections: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 128,
            max_cpu_percent: 25.0,
            max_execution_time: Duration::from_secs(30),
            max_goroutines: 10,
            max_connections: 5,
        }
    }
}

impl PluginManifest {
    /// Read a manifest from a file, or from a directory containing `plugin.yaml`.
    ///
    /// Returns the manifest together with the directory it was found in, which
    /// is the base for resolving a relative `entry_point`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<(Self, PathBuf), PluginError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            MANIFEST_FILE_NAMES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| {
                    PluginError::Manifest(format!("Missing plugin.yaml in {}", path.display()))
                })?
        } else {
            path.to_path_buf()
        };

        let manifest = Self::from_file(&file)?;
        let base_dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((manifest, base_dir))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PluginError::Manifest(format!("Failed to read manifest: {}", e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PluginError> {
        serde_yaml::from_str(content)
            .map_err(|e| PluginError::Manifest(format!("Failed to parse manifest: {}", e)))
    }

    /// Declared permissions as a set
    pub fn permission_set(&self) -> PermissionSet {
        self.permissions.iter().copied().collect()
    }

    /// Permissions the manifest attaches to a declared command, if any
    pub fn command_permissions(&self, name: &str) -> &[Permission] {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.permissions.as_slice())
            .unwrap_or(&[])
    }

    /// Structural checks that do not depend on the active security policy
    pub fn validate_structure(&self) -> Result<(), PluginError> {
        if !is_valid_name(&self.name) {
            return Err(PluginError::Manifest(format!(
                "Invalid plugin name '{}': use lowercase letters, digits, '-' or '_'",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::Manifest(format!("Plugin '{}' has no version", self.name)));
        }
        if self.entry_point.trim().is_empty() {
            return Err(PluginError::Manifest(format!("Plugin '{}' has no entry_point", self.name)));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(PluginError::Manifest(format!("Plugin '{}' depends on itself", self.name)));
        }

        let granted = self.permission_set();
        let mut seen = HashSet::new();
        for command in &self.commands {
            if !seen.insert(command.name.to_lowercase()) {
                return Err(PluginError::Manifest(format!(
                    "Plugin '{}' declares command '{}' twice",
                    self.name, command.name
                )));
            }
            if let Some(missing) = granted.missing(&command.permissions).first() {
                return Err(PluginError::PermissionDenied {
                    plugin: self.name.clone(),
                    permission: missing.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Parse `"500ms"`, `"30s"`, `"2m"`, `"1h"` or a bare number of seconds
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;
    let seconds = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit '{}'", other)),
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("invalid duration '{}'", input));
    }
    Ok(Duration::from_secs_f64(seconds))
}

pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            RawDuration::Seconds(s) => Ok(Duration::from_secs(s)),
            RawDuration::Text(t) => parse_duration(&t),
        }
    }
}

mod duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        RawDuration::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

mod optional_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format_duration(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
