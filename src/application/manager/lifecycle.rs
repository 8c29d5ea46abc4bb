//! Extension lifecycle state machine
//!
//! ```text
//! Unloaded -> Loading -> Running <-> {Degraded, Unhealthy} -> Unloading -> Unloaded
//!               |           |
//!               +-> Error <-+          (Error only leaves through Unloading)
//! ```

use serde::Serialize;
use std::fmt;

use crate::domain::entities::HealthLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Running,
    Degraded,
    Unhealthy,
    Unloading,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Running => "running",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Unhealthy => "unhealthy",
            LifecycleState::Unloading => "unloading",
            LifecycleState::Error => "error",
        }
    }

    /// State matching a health classification while initialized
    pub fn from_level(level: HealthLevel) -> Self {
        match level {
            HealthLevel::Healthy => LifecycleState::Running,
            HealthLevel::Degraded => LifecycleState::Degraded,
            HealthLevel::Unhealthy => LifecycleState::Unhealthy,
        }
    }

    /// Initialized and not terminally failed
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Running | LifecycleState::Degraded | LifecycleState::Unhealthy
        )
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        if *self == next {
            return true;
        }
        match (*self, next) {
            (Unloaded, Loading) => true,
            (Loading, Running) | (Loading, Error) | (Loading, Unloaded) => true,
            (from, to) if from.is_active() && to.is_active() => true,
            (from, Error) if from.is_active() => true,
            (from, Unloading) if from.is_active() || from == Error => true,
            (Unloading, Unloaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;

    #[test]
    fn allows_documented_transitions() {
        assert!(Unloaded.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Running));
        assert!(Loading.can_transition_to(Error));
        assert!(Running.can_transition_to(Degraded));
        assert!(Unhealthy.can_transition_to(Running));
        assert!(Running.can_transition_to(Error));
        assert!(Error.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(Unloaded));
    }

    #[test]
    fn error_is_terminal_until_unloaded() {
        assert!(!Error.can_transition_to(Running));
        assert!(!Error.can_transition_to(Degraded));
        assert!(!Unloading.can_transition_to(Running));
        assert!(!Unloaded.can_transition_to(Running));
        assert!(!Error.is_active());
    }
}
