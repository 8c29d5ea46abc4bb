//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use carik_runtime::application::errors::PluginError;
use carik_runtime::application::manager::{ExtensionManager, ManagerSettings};
use carik_runtime::application::security::{PolicyTier, SecurityManager};
use carik_runtime::domain::entities::{
    Command, CommandDefinition, Event, Message, PluginHealth, PluginManifest, Response,
};
use carik_runtime::domain::traits::{
    CommandHandler, EventListener, MessageProcessor, Plugin, PluginConfig,
};

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn settings() -> ManagerSettings {
    ManagerSettings {
        init_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_millis(200),
        command_timeout: Duration::from_millis(500),
        event_timeout: Duration::from_millis(100),
        message_timeout: Duration::from_millis(200),
        ..ManagerSettings::default()
    }
}

pub fn manager() -> ExtensionManager {
    manager_with_tier(PolicyTier::Moderate)
}

pub fn manager_with_tier(tier: PolicyTier) -> ExtensionManager {
    ensure_init();
    ExtensionManager::builder(settings())
        .with_security(SecurityManager::for_tier(tier))
        .build()
}

/// Manifest with the given permissions; `extra` is appended verbatim as YAML
pub fn manifest(name: &str, permissions: &[&str], extra: &str) -> PluginManifest {
    let yaml = format!(
        "name: {}\nversion: 1.0.0\nentry_point: builtin:{}\npermissions: [{}]\n{}",
        name,
        name,
        permissions.join(", "),
        extra
    );
    PluginManifest::from_yaml(&yaml).unwrap()
}

/// Configurable test extension; each role is enabled by setting its field
pub struct Mock {
    pub name: String,
    pub priority: Option<i32>,
    pub tag: String,
    pub fail_process: bool,
    pub pass_through: bool,
    pub commands: Vec<CommandDefinition>,
    pub events: Vec<String>,
    pub event_delay: Option<Duration>,
    pub init_delay: Option<Duration>,
    pub fail_shutdown: bool,
    pub health: Mutex<PluginHealth>,
    pub init_calls: AtomicUsize,
    pub command_calls: AtomicUsize,
    pub event_calls: AtomicUsize,
    pub shutdown_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl Mock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            priority: None,
            tag: name.to_string(),
            fail_process: false,
            pass_through: false,
            commands: Vec::new(),
            events: Vec::new(),
            event_delay: None,
            init_delay: None,
            fail_shutdown: false,
            health: Mutex::new(PluginHealth::running()),
            init_calls: AtomicUsize::new(0),
            command_calls: AtomicUsize::new(0),
            event_calls: AtomicUsize::new(0),
            shutdown_log: None,
        }
    }

    pub fn processor(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_process = true;
        self
    }

    /// Processor that returns every message untouched
    pub fn pass_through(mut self) -> Self {
        self.pass_through = true;
        self
    }

    pub fn command(mut self, definition: CommandDefinition) -> Self {
        self.commands.push(definition);
        self
    }

    pub fn listening(mut self, event_type: &str) -> Self {
        self.events.push(event_type.to_string());
        self
    }

    pub fn slow_events(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    pub fn slow_init(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn logging_shutdown(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.shutdown_log = Some(log);
        self
    }

    pub fn set_health(&self, health: PluginHealth) {
        *self.health.lock().unwrap() = health;
    }

    pub fn commands_handled(&self) -> usize {
        self.command_calls.load(Ordering::SeqCst)
    }

    pub fn events_handled(&self) -> usize {
        self.event_calls.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for Mock {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&self, _config: PluginConfig) -> Result<(), PluginError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Some(log) = &self.shutdown_log {
            log.lock().unwrap().push(self.name.clone());
        }
        if self.fail_shutdown {
            return Err(PluginError::execution(&self.name, "refused to stop"));
        }
        Ok(())
    }

    fn health(&self) -> PluginHealth {
        self.health.lock().unwrap().clone()
    }

    fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
        self.priority.is_some().then_some(self as &dyn MessageProcessor)
    }

    fn as_command_handler(&self) -> Option<&dyn CommandHandler> {
        (!self.commands.is_empty()).then_some(self as &dyn CommandHandler)
    }

    fn as_event_listener(&self) -> Option<&dyn EventListener> {
        (!self.events.is_empty()).then_some(self as &dyn EventListener)
    }
}

#[async_trait]
impl MessageProcessor for Mock {
    fn priority(&self) -> i32 {
        self.priority.unwrap_or_default()
    }

    async fn process_message(&self, message: Message) -> Result<Message, PluginError> {
        if self.fail_process {
            return Err(PluginError::execution(&self.name, "stage failed"));
        }
        if self.pass_through {
            return Ok(message);
        }
        let content = format!("{}|{}", message.content, self.tag);
        Ok(message.with_content(content))
    }
}

#[async_trait]
impl CommandHandler for Mock {
    fn commands(&self) -> Vec<CommandDefinition> {
        self.commands.clone()
    }

    async fn handle_command(&self, command: Command) -> Result<Response, PluginError> {
        self.command_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::message(format!("{} handled {}", self.name, command.name)))
    }
}

#[async_trait]
impl EventListener for Mock {
    fn subscribed_events(&self) -> Vec<String> {
        self.events.clone()
    }

    async fn handle_event(&self, _event: Event) -> Result<(), PluginError> {
        if let Some(delay) = self.event_delay {
            tokio::time::sleep(delay).await;
        }
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
