//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::errors::ConfigError;
use crate::application::manager::ManagerSettings;
use crate::application::security::{PolicyTier, Sanitizer, SecurityManager, SecurityPolicy};
use crate::domain::entities::ResourceLimits;

/// Runtime configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginsConfig,
    pub runtime: RuntimeConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "carik-bot".to_string(),
            prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginsConfig {
    pub directory: PathBuf,
    pub auto_load: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./plugins"),
            auto_load: true,
        }
    }
}

/// Timeouts are in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuntimeConfig {
    pub init_timeout: u64,
    pub shutdown_timeout: u64,
    pub command_timeout: u64,
    pub event_timeout: u64,
    pub message_timeout: u64,
    pub health_check_interval: u64,
    pub max_concurrent_events: usize,
    pub event_bus_capacity: usize,
    /// Unset keeps unhealthy plugins loaded
    pub unload_after_unhealthy_checks: Option<u32>,
    /// Applied to manifests that omit resource limits
    pub resources: ResourceLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let settings = ManagerSettings::default();
        Self {
            init_timeout: settings.init_timeout.as_secs(),
            shutdown_timeout: settings.shutdown_timeout.as_secs(),
            command_timeout: settings.command_timeout.as_secs(),
            event_timeout: settings.event_timeout.as_secs(),
            message_timeout: settings.message_timeout.as_secs(),
            health_check_interval: settings.health_interval.as_secs(),
            max_concurrent_events: settings.max_concurrent_events,
            event_bus_capacity: settings.event_bus_capacity,
            unload_after_unhealthy_checks: settings.unload_after_unhealthy_checks,
            resources: ResourceLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SecurityConfig {
    pub tier: PolicyTier,
    pub max_content_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tier: PolicyTier::default(),
            max_content_length: Sanitizer::default().max_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    /// Unset runs without a database; `:memory:` keeps it in memory
    pub path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("data/carik.db")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    /// Defaults plus environment overrides
    pub fn load_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise defaults; then apply the
    /// environment and validate
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Config::load(path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = std::env::var("CARIK_PLUGINS_DIR") {
            self.plugins.directory = PathBuf::from(dir);
        }

        if let Ok(tier) = std::env::var("CARIK_SECURITY_TIER") {
            self.security.tier = tier
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("CARIK_SECURITY_TIER: {}", e)))?;
        }

        if let Ok(level) = std::env::var("CARIK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            self.bot.prefix = prefix;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        let timeouts = [
            ("init-timeout", runtime.init_timeout),
            ("shutdown-timeout", runtime.shutdown_timeout),
            ("command-timeout", runtime.command_timeout),
            ("event-timeout", runtime.event_timeout),
            ("message-timeout", runtime.message_timeout),
            ("health-check-interval", runtime.health_check_interval),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("runtime.{} must be positive", key)));
            }
        }
        if runtime.max_concurrent_events == 0 {
            return Err(ConfigError::InvalidValue(
                "runtime.max-concurrent-events must be positive".to_string(),
            ));
        }
        if self.security.max_content_length == 0 {
            return Err(ConfigError::InvalidValue(
                "security.max-content-length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Parse(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| ConfigError::Parse(format!("Failed to write config: {}", e)))
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let r = &self.runtime;
        ManagerSettings {
            init_timeout: Duration::from_secs(r.init_timeout),
            shutdown_timeout: Duration::from_secs(r.shutdown_timeout),
            command_timeout: Duration::from_secs(r.command_timeout),
            event_timeout: Duration::from_secs(r.event_timeout),
            message_timeout: Duration::from_secs(r.message_timeout),
            health_interval: Duration::from_secs(r.health_check_interval),
            max_concurrent_events: r.max_concurrent_events,
            event_bus_capacity: r.event_bus_capacity,
            unload_after_unhealthy_checks: r.unload_after_unhealthy_checks,
        }
    }

    pub fn security_manager(&self) -> SecurityManager {
        SecurityManager::new(
            SecurityPolicy::for_tier(self.security.tier),
            self.runtime.resources.clone(),
        )
        .with_sanitizer(Sanitizer::new(self.security.max_content_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "bot:\n  prefix: '?'\nruntime:\n  command-timeout: 5\n  unload-after-unhealthy-checks: 3\nsecurity:\n  tier: strict\n",
        )
        .unwrap();
        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.bot.name, "carik-bot");
        assert_eq!(config.security.tier, PolicyTier::Strict);

        let settings = config.manager_settings();
        assert_eq!(settings.command_timeout, Duration::from_secs(5));
        assert_eq!(settings.event_timeout, Duration::from_secs(10));
        assert_eq!(settings.unload_after_unhealthy_checks, Some(3));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.runtime.event_timeout = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn save_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.yaml");
        let mut config = Config::default();
        config.plugins.directory = PathBuf::from("/opt/plugins");
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.plugins.directory, PathBuf::from("/opt/plugins"));
        assert_eq!(loaded.runtime.resources, ResourceLimits::default());
    }

    #[test]
    fn security_manager_follows_tier() {
        let mut config = Config::default();
        config.security.tier = PolicyTier::Strict;
        config.security.max_content_length = 5;
        let security = config.security_manager();
        assert_eq!(security.policy().tier, PolicyTier::Strict);
        assert_eq!(security.sanitize_content("abcdefgh"), "abcde");
    }
}
