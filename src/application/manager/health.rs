//! Periodic health checks
//!
//! Each pass takes the worse of an extension's own `health()` report and the
//! resource monitor's classification. An extension reporting `Error` moves
//! to the terminal `Error` state and leaves every dispatch table.

use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{ExtensionManager, LifecycleState};
use crate::application::monitor::ResourceSample;
use crate::domain::entities::event::{PLUGIN_ERRORED, PLUGIN_HEALTH_CHANGED};
use crate::domain::entities::{Event, HealthLevel, PluginHealth, PluginStatus};

/// Outcome of checking one extension
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub plugin: String,
    pub state: LifecycleState,
    pub level: HealthLevel,
    pub health: PluginHealth,
    pub reasons: Vec<String>,
    pub usage: Option<ResourceSample>,
}

impl ExtensionManager {
    /// Run one health pass over every active extension
    pub async fn check_health(&self) -> Vec<HealthReport> {
        let inner = &self.inner;
        let mut reports = Vec::new();

        for (name, plugin) in inner.registry.health_targets() {
            let reported = plugin.health();
            let (usage, reasons, monitored) = match inner.monitor.check(&name) {
                Some((sample, verdict)) => (Some(sample), verdict.reasons, verdict.level),
                None => (None, Vec::new(), HealthLevel::Healthy),
            };

            let level = reported.level().max(monitored);
            let next = if reported.status == PluginStatus::Error {
                LifecycleState::Error
            } else {
                LifecycleState::from_level(level)
            };

            let mut health = reported;
            if !reasons.is_empty() {
                health = health.with_detail("resource_reasons", reasons.clone());
            }

            // None: unloaded between the snapshot and now
            let Some(transition) = inner
                .registry
                .record_health(&name, health.clone(), level, next)
            else {
                continue;
            };

            if transition.from != transition.to {
                info!(plugin = %name, from = %transition.from, to = %transition.to, "Plugin health changed");
                inner.bus.emit(
                    Event::new(PLUGIN_HEALTH_CHANGED)
                        .with_data("plugin", name.as_str())
                        .with_data("from", transition.from.as_str())
                        .with_data("to", transition.to.as_str())
                        .with_data("message", health.message.as_str()),
                );
                if transition.to == LifecycleState::Error {
                    error!(plugin = %name, "Plugin entered error state: {}", health.message);
                    inner.bus.emit(
                        Event::new(PLUGIN_ERRORED)
                            .with_data("plugin", name.as_str())
                            .with_data("message", health.message.as_str()),
                    );
                }
            }

            if level == HealthLevel::Unhealthy {
                warn!(
                    plugin = %name,
                    checks = transition.consecutive_unhealthy,
                    reasons = ?reasons,
                    "Plugin is unhealthy: {}",
                    health.message
                );
            }

            reports.push(HealthReport {
                plugin: name.clone(),
                state: transition.to,
                level,
                health,
                reasons,
                usage,
            });

            if let Some(limit) = inner.settings.unload_after_unhealthy_checks {
                if transition.consecutive_unhealthy >= limit.max(1) {
                    warn!(plugin = %name, checks = transition.consecutive_unhealthy, "Unloading persistently unhealthy plugin");
                    if let Err(e) = self.unload_plugin(&name).await {
                        warn!(plugin = %name, "Auto-unload failed: {}", e);
                    }
                }
            }
        }

        reports
    }

    /// Spawn the periodic health loop; it stops when the manager shuts down
    pub fn start_health_checks(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.settings.health_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = manager.inner.root.cancelled() => break,
                    _ = ticker.tick() => {
                        let reports = manager.check_health().await;
                        debug!(checked = reports.len(), "Health check pass complete");
                    }
                }
            }
            debug!("Health check loop stopped");
        })
    }
}
