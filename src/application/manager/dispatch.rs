//! The three dispatch paths: message pipeline, command routing, event fan-out

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{bounded, ExtensionManager};
use crate::application::errors::PluginError;
use crate::domain::entities::{Command, Event, Message, Permission, Response};

/// One processor's failure inside the message pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub plugin: String,
    pub error: PluginError,
}

/// Final message plus every stage that failed along the way
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub message: Message,
    pub errors: Vec<StageError>,
}

impl PipelineOutput {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// How one listener handled an event
#[derive(Debug)]
pub struct ListenerOutcome {
    pub plugin: String,
    pub result: Result<(), PluginError>,
}

/// Handles to the listener tasks spawned for one event.
///
/// Dropping this detaches the tasks; `join` waits for all of them.
#[derive(Debug)]
pub struct EventDispatch {
    event_type: String,
    handles: Vec<(String, JoinHandle<Result<(), PluginError>>)>,
}

impl EventDispatch {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn listener_count(&self) -> usize {
        self.handles.len()
    }

    pub fn listeners(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(name, _)| name.as_str())
    }

    pub async fn join(self) -> Vec<ListenerOutcome> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for (plugin, handle) in self.handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    warn!(plugin = %plugin, event_type = %self.event_type, "Event listener panicked");
                    Err(PluginError::execution(&plugin, "listener panicked"))
                }
                Err(_) => Err(PluginError::Cancelled),
            };
            outcomes.push(ListenerOutcome { plugin, result });
        }
        outcomes
    }
}

impl ExtensionManager {
    /// Account and bound one hook call into extension code
    async fn call_hook<T, F>(
        &self,
        plugin: &str,
        operation: &str,
        path_timeout: Duration,
        fut: F,
    ) -> Result<T, PluginError>
    where
        F: Future<Output = Result<T, PluginError>>,
    {
        let monitor = &self.inner.monitor;
        let guard = monitor.begin_call(plugin)?;
        let after = monitor.call_timeout(plugin, path_timeout);
        let outcome = bounded(plugin, operation, after, Some(&self.inner.root), fut).await;
        guard.finish(&outcome);
        outcome
    }

    /// Run `message` through every processor in ascending priority.
    ///
    /// A failing stage is skipped: the next stage receives the message as it
    /// was before the failure, and the failure is reported in the output.
    pub async fn process_message(&self, message: Message) -> Result<PipelineOutput, PluginError> {
        self.ensure_running()?;
        let security = &self.inner.security;
        let timeout = self.inner.settings.message_timeout;

        let mut current = message;
        current.content = security.sanitize_content(&current.content);
        let mut errors = Vec::new();

        for slot in self.inner.registry.processors() {
            let Some(processor) = slot.plugin.as_message_processor() else {
                continue;
            };

            let outcome = self
                .call_hook(&slot.name, "process_message", timeout, processor.process_message(current.clone()))
                .await;

            match outcome {
                Ok(mut output) => {
                    output.content = security.sanitize_content(&output.content);
                    if output.content != current.content
                        && !slot.granted.contains(Permission::WriteMessages)
                    {
                        warn!(plugin = %slot.name, "Discarding content change from processor without write-messages");
                        errors.push(StageError {
                            plugin: slot.name.clone(),
                            error: PluginError::permission_denied(&slot.name, Permission::WriteMessages),
                        });
                        continue;
                    }
                    // identity fields are host-owned
                    output.id = current.id.clone();
                    output.author = current.author.clone();
                    output.channel_id = current.channel_id.clone();
                    output.server_id = current.server_id.clone();
                    current = output;
                }
                Err(PluginError::Cancelled) => {
                    errors.push(StageError {
                        plugin: slot.name.clone(),
                        error: PluginError::Cancelled,
                    });
                    break;
                }
                Err(error) => {
                    warn!(plugin = %slot.name, code = error.code(), "Message processor failed, skipping: {}", error);
                    errors.push(StageError {
                        plugin: slot.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(PipelineOutput {
            message: current,
            errors,
        })
    }

    /// Route `command` to the first-registered handler that owns its name
    pub async fn handle_command(&self, command: Command) -> Result<Response, PluginError> {
        self.ensure_running()?;
        let inner = &self.inner;

        let target = inner
            .registry
            .command_target(&command.name)
            .ok_or_else(|| PluginError::UnknownCommand(command.name.clone()))?;
        let plugin = target.slot.name.as_str();

        if let Err(e) = inner
            .security
            .check_command_permissions(plugin, &target.slot.granted, &target.required)
        {
            warn!(plugin, command = %command.name, "Command blocked: {}", e);
            return Err(e);
        }

        let handler = target
            .slot
            .plugin
            .as_command_handler()
            .ok_or_else(|| PluginError::UnknownCommand(command.name.clone()))?;

        let mut command = inner.security.sanitize_command(command);
        command.name = target.definition.name.clone();
        debug!(plugin, command = %command.name, "Dispatching command");

        let response = self
            .call_hook(plugin, "handle_command", inner.settings.command_timeout, handler.handle_command(command))
            .await
            .map_err(|e| {
                warn!(plugin, code = e.code(), "Command handler failed: {}", e);
                e
            })?;

        Ok(inner.security.sanitize_response(response))
    }

    /// Deliver `event` to every subscribed listener, one task each.
    ///
    /// Returns once every listener task is spawned; waits only when the
    /// concurrent-listener limit is saturated. Listener errors stay in the
    /// returned [`EventDispatch`] and are never raised to the caller.
    pub async fn emit_event(&self, mut event: Event) -> EventDispatch {
        let inner = &self.inner;
        let security = inner.security.clone();
        event.data = std::mem::take(&mut event.data)
            .into_iter()
            .map(|(k, v)| (k, security.sanitize_value(v)))
            .collect();

        let mut dispatch = EventDispatch {
            event_type: event.event_type.clone(),
            handles: Vec::new(),
        };

        for slot in inner.registry.listeners(&event.event_type) {
            let permit = tokio::select! {
                biased;
                _ = inner.root.cancelled() => break,
                permit = inner.event_slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let manager = self.clone();
            let event = event.clone();
            let name = slot.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let Some(listener) = slot.plugin.as_event_listener() else {
                    return Ok(());
                };
                let timeout = manager.inner.settings.event_timeout;
                let event_type = event.event_type.clone();
                let outcome = manager
                    .call_hook(&slot.name, "handle_event", timeout, listener.handle_event(event))
                    .await;
                if let Err(e) = &outcome {
                    warn!(plugin = %slot.name, event_type = %event_type, code = e.code(), "Event listener failed: {}", e);
                }
                outcome
            });
            dispatch.handles.push((name, handle));
        }

        debug!(
            event_type = %dispatch.event_type,
            listeners = dispatch.handles.len(),
            "Event dispatched"
        );
        dispatch
    }
}
