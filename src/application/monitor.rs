//! Resource monitor - per-extension usage accounting
//!
//! Counters are owned here. Extensions (or their sandbox) only see a
//! [`UsageReporter`] handle for the gauges they can measure themselves;
//! call accounting is done by the manager through [`CallGuard`].
//! The monitor reports; it never unloads anything.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::application::errors::PluginError;
use crate::domain::entities::{HealthLevel, ResourceLimits};

/// Timeouts since the previous sample at which an extension counts as unhealthy
const UNHEALTHY_TIMEOUTS: u64 = 3;

#[derive(Debug, Default)]
struct Counters {
    active_calls: AtomicU32,
    peak_calls: AtomicU32,
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    timed_out_calls: AtomicU64,
    timeouts_since_sample: AtomicU64,
    last_call_ms: AtomicU64,
    memory_mb: AtomicU64,
    // hundredths of a percent
    cpu_centi_percent: AtomicU64,
    connections: AtomicU32,
}

#[derive(Debug)]
struct Tracked {
    name: String,
    limits: ResourceLimits,
    counters: Counters,
}

/// Point-in-time usage of one extension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub active_calls: u32,
    pub peak_calls: u32,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub timed_out_calls: u64,
    pub timeouts_since_last_sample: u64,
    pub last_call_ms: u64,
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub connections: u32,
}

/// Monitor verdict for one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub level: HealthLevel,
    pub reasons: Vec<String>,
}

/// Handle an extension uses to report gauges the host cannot measure
#[derive(Debug, Clone)]
pub struct UsageReporter {
    tracked: Arc<Tracked>,
}

impl UsageReporter {
    pub fn report_memory_mb(&self, mb: u64) {
        self.tracked.counters.memory_mb.store(mb, Ordering::Relaxed);
    }

    pub fn report_cpu_percent(&self, percent: f64) {
        let centi = (percent.max(0.0) * 100.0).round() as u64;
        self.tracked.counters.cpu_centi_percent.store(centi, Ordering::Relaxed);
    }

    /// Claim a connection slot; fails once `max_connections` are open
    pub fn open_connection(&self) -> Result<ConnectionGuard, PluginError> {
        let max = self.tracked.limits.max_connections;
        let counters = &self.tracked.counters;
        let previous = counters
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            });
        match previous {
            Ok(_) => Ok(ConnectionGuard {
                tracked: self.tracked.clone(),
            }),
            Err(open) => Err(PluginError::ResourceLimitExceeded {
                plugin: self.tracked.name.clone(),
                resource: "connections".to_string(),
                detail: format!("{} of {} connections already open", open, max),
            }),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.tracked.limits
    }
}

/// Releases a connection slot on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    tracked: Arc<Tracked>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracked.counters.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accounts one in-flight hook call; the active count drops when this does
#[derive(Debug)]
pub struct CallGuard {
    tracked: Arc<Tracked>,
    started: Instant,
}

impl CallGuard {
    /// Record how the call ended
    pub fn finish<T>(self, outcome: &Result<T, PluginError>) {
        let counters = &self.tracked.counters;
        let elapsed = self.started.elapsed().as_millis() as u64;
        counters.last_call_ms.store(elapsed, Ordering::Relaxed);
        match outcome {
            Ok(_) => {}
            Err(PluginError::Timeout { .. }) => {
                counters.failed_calls.fetch_add(1, Ordering::Relaxed);
                counters.timed_out_calls.fetch_add(1, Ordering::Relaxed);
                counters.timeouts_since_sample.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.failed_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.tracked.counters.active_calls.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks usage of every registered extension against its limits
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    plugins: RwLock<HashMap<String, Arc<Tracked>>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name`; replaces any previous counters
    pub fn register_plugin(&self, name: &str, limits: ResourceLimits) -> Result<UsageReporter, PluginError> {
        let tracked = Arc::new(Tracked {
            name: name.to_string(),
            limits,
            counters: Counters::default(),
        });
        self.plugins
            .write()
            .map_err(|_| PluginError::lock_poisoned())?
            .insert(name.to_string(), tracked.clone());
        tracing::debug!(plugin = %name, "Resource monitor tracking plugin");
        Ok(UsageReporter { tracked })
    }

    pub fn unregister_plugin(&self, name: &str) -> Result<(), PluginError> {
        let removed = self
            .plugins
            .write()
            .map_err(|_| PluginError::lock_poisoned())?
            .remove(name);
        if removed.is_some() {
            tracing::debug!(plugin = %name, "Resource monitor released plugin");
        }
        Ok(())
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.plugins
            .read()
            .map(|p| p.contains_key(name))
            .unwrap_or(false)
    }

    fn tracked(&self, name: &str) -> Result<Arc<Tracked>, PluginError> {
        self.plugins
            .read()
            .map_err(|_| PluginError::lock_poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Per-call deadline for `name`: the path timeout capped by its execution limit
    pub fn call_timeout(&self, name: &str, path_timeout: Duration) -> Duration {
        self.tracked(name)
            .map(|t| t.limits.max_execution_time.min(path_timeout))
            .unwrap_or(path_timeout)
    }

    /// Account the start of a hook call.
    ///
    /// Fails with `ResourceLimitExceeded` when the extension already has
    /// `max_goroutines` calls in flight.
    pub fn begin_call(&self, name: &str) -> Result<CallGuard, PluginError> {
        let tracked = self.tracked(name)?;
        let max = tracked.limits.max_goroutines;
        let counters = &tracked.counters;

        let previous = counters
            .active_calls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < max).then_some(active + 1)
            });
        let active = match previous {
            Ok(before) => before + 1,
            Err(active) => {
                counters.failed_calls.fetch_add(1, Ordering::Relaxed);
                return Err(PluginError::ResourceLimitExceeded {
                    plugin: name.to_string(),
                    resource: "concurrency".to_string(),
                    detail: format!("{} of {} concurrent calls in flight", active, max),
                });
            }
        };
        counters.total_calls.fetch_add(1, Ordering::Relaxed);
        counters.peak_calls.fetch_max(active, Ordering::Relaxed);

        Ok(CallGuard {
            tracked: tracked.clone(),
            started: Instant::now(),
        })
    }

    /// Take a sample; resets the timeouts-since-last-sample counter
    pub fn sample(&self, name: &str) -> Option<ResourceSample> {
        let tracked = self.tracked(name).ok()?;
        let c = &tracked.counters;
        Some(ResourceSample {
            active_calls: c.active_calls.load(Ordering::Acquire),
            peak_calls: c.peak_calls.load(Ordering::Relaxed),
            total_calls: c.total_calls.load(Ordering::Relaxed),
            failed_calls: c.failed_calls.load(Ordering::Relaxed),
            timed_out_calls: c.timed_out_calls.load(Ordering::Relaxed),
            timeouts_since_last_sample: c.timeouts_since_sample.swap(0, Ordering::AcqRel),
            last_call_ms: c.last_call_ms.load(Ordering::Relaxed),
            memory_mb: c.memory_mb.load(Ordering::Relaxed),
            cpu_percent: c.cpu_centi_percent.load(Ordering::Relaxed) as f64 / 100.0,
            connections: c.connections.load(Ordering::Acquire),
        })
    }

    /// Usage without consuming the timeout window, for admin listings
    pub fn peek(&self, name: &str) -> Option<ResourceSample> {
        let tracked = self.tracked(name).ok()?;
        let c = &tracked.counters;
        Some(ResourceSample {
            active_calls: c.active_calls.load(Ordering::Acquire),
            peak_calls: c.peak_calls.load(Ordering::Relaxed),
            total_calls: c.total_calls.load(Ordering::Relaxed),
            failed_calls: c.failed_calls.load(Ordering::Relaxed),
            timed_out_calls: c.timed_out_calls.load(Ordering::Relaxed),
            timeouts_since_last_sample: c.timeouts_since_sample.load(Ordering::Acquire),
            last_call_ms: c.last_call_ms.load(Ordering::Relaxed),
            memory_mb: c.memory_mb.load(Ordering::Relaxed),
            cpu_percent: c.cpu_centi_percent.load(Ordering::Relaxed) as f64 / 100.0,
            connections: c.connections.load(Ordering::Acquire),
        })
    }

    /// Sample `name` and classify it against its limits
    pub fn check(&self, name: &str) -> Option<(ResourceSample, Classification)> {
        let limits = self.tracked(name).ok()?.limits.clone();
        let sample = self.sample(name)?;
        let classification = classify(&sample, &limits);
        Some((sample, classification))
    }
}

/// Compare a sample with declared limits.
///
/// Soft breaches (memory, CPU, connections, a timeout) degrade; memory
/// above twice the limit or repeated timeouts make the extension unhealthy.
pub fn classify(sample: &ResourceSample, limits: &ResourceLimits) -> Classification {
    let mut level = HealthLevel::Healthy;
    let mut reasons = Vec::new();
    let mut raise = |to: HealthLevel, reason: String| {
        level = level.max(to);
        reasons.push(reason);
    };

    if sample.memory_mb > limits.max_memory_mb.saturating_mul(2) {
        raise(
            HealthLevel::Unhealthy,
            format!("memory {}MB is over twice the {}MB limit", sample.memory_mb, limits.max_memory_mb),
        );
    } else if sample.memory_mb > limits.max_memory_mb {
        raise(
            HealthLevel::Degraded,
            format!("memory {}MB exceeds {}MB limit", sample.memory_mb, limits.max_memory_mb),
        );
    }
    if sample.cpu_percent > limits.max_cpu_percent {
        raise(
            HealthLevel::Degraded,
            format!("cpu {:.1}% exceeds {:.1}% limit", sample.cpu_percent, limits.max_cpu_percent),
        );
    }
    if sample.connections >= limits.max_connections && limits.max_connections > 0 {
        raise(
            HealthLevel::Degraded,
            format!("all {} connections in use", limits.max_connections),
        );
    }
    if sample.active_calls >= limits.max_goroutines && limits.max_goroutines > 0 {
        raise(
            HealthLevel::Degraded,
            format!("all {} call slots busy", limits.max_goroutines),
        );
    }
    match sample.timeouts_since_last_sample {
        0 => {}
        n if n >= UNHEALTHY_TIMEOUTS => raise(HealthLevel::Unhealthy, format!("{} calls timed out", n)),
        n => raise(HealthLevel::Degraded, format!("{} call(s) timed out", n)),
    }

    Classification { level, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_mb: 100,
            max_cpu_percent: 20.0,
            max_execution_time: Duration::from_secs(2),
            max_goroutines: 2,
            max_connections: 1,
        }
    }

    fn timeout_err() -> Result<(), PluginError> {
        Err(PluginError::Timeout {
            plugin: "p".into(),
            operation: "handle_command".into(),
            after: Duration::from_millis(1),
        })
    }

    #[test]
    fn begin_call_enforces_concurrency_limit() {
        let monitor = ResourceMonitor::new();
        monitor.register_plugin("p", limits()).unwrap();

        let first = monitor.begin_call("p").unwrap();
        let _second = monitor.begin_call("p").unwrap();
        assert!(matches!(
            monitor.begin_call("p"),
            Err(PluginError::ResourceLimitExceeded { .. })
        ));

        first.finish(&Ok::<(), PluginError>(()));
        assert!(monitor.begin_call("p").is_ok());

        let sample = monitor.sample("p").unwrap();
        assert_eq!(sample.peak_calls, 2);
        assert_eq!(sample.total_calls, 3);
        assert_eq!(sample.failed_calls, 1);
    }

    #[test]
    fn timeouts_degrade_then_reset_after_sample() {
        let monitor = ResourceMonitor::new();
        monitor.register_plugin("p", limits()).unwrap();
        monitor.begin_call("p").unwrap().finish(&timeout_err());

        let (_, verdict) = monitor.check("p").unwrap();
        assert_eq!(verdict.level, HealthLevel::Degraded);

        let (sample, verdict) = monitor.check("p").unwrap();
        assert_eq!(sample.timed_out_calls, 1);
        assert_eq!(verdict.level, HealthLevel::Healthy);

        for _ in 0..3 {
            monitor.begin_call("p").unwrap().finish(&timeout_err());
        }
        assert_eq!(monitor.check("p").unwrap().1.level, HealthLevel::Unhealthy);
    }

    #[test]
    fn reported_gauges_drive_classification() {
        let monitor = ResourceMonitor::new();
        let reporter = monitor.register_plugin("p", limits()).unwrap();

        reporter.report_memory_mb(150);
        reporter.report_cpu_percent(35.5);
        let (sample, verdict) = monitor.check("p").unwrap();
        assert_eq!(sample.cpu_percent, 35.5);
        assert_eq!(verdict.level, HealthLevel::Degraded);
        assert_eq!(verdict.reasons.len(), 2);

        reporter.report_memory_mb(250);
        assert_eq!(monitor.check("p").unwrap().1.level, HealthLevel::Unhealthy);
    }

    #[test]
    fn connection_slots_are_bounded() {
        let monitor = ResourceMonitor::new();
        let reporter = monitor.register_plugin("p", limits()).unwrap();
        let guard = reporter.open_connection().unwrap();
        assert!(reporter.open_connection().is_err());
        drop(guard);
        assert!(reporter.open_connection().is_ok());
    }

    #[test]
    fn call_timeout_is_capped_by_execution_limit() {
        let monitor = ResourceMonitor::new();
        monitor.register_plugin("p", limits()).unwrap();
        assert_eq!(monitor.call_timeout("p", Duration::from_secs(30)), Duration::from_secs(2));
        assert_eq!(monitor.call_timeout("p", Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(monitor.call_timeout("gone", Duration::from_secs(9)), Duration::from_secs(9));

        monitor.unregister_plugin("p").unwrap();
        assert!(!monitor.is_tracked("p"));
        assert!(monitor.sample("p").is_none());
    }
}
