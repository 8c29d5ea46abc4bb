//! Security policy tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::entities::{Permission, PermissionSet, ResourceLimits};

/// How much an operator trusts the extensions it loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    Strict,
    Moderate,
    Permissive,
}

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyTier::Strict => "strict",
            PolicyTier::Moderate => "moderate",
            PolicyTier::Permissive => "permissive",
        }
    }
}

impl Default for PolicyTier {
    fn default() -> Self {
        PolicyTier::Moderate
    }
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PolicyTier::Strict),
            "moderate" => Ok(PolicyTier::Moderate),
            "permissive" => Ok(PolicyTier::Permissive),
            other => Err(format!("unknown security tier '{}'", other)),
        }
    }
}

/// Allow-list and resource ceiling enforced for one tier
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    pub tier: PolicyTier,
    pub allowed: PermissionSet,
    pub ceiling: ResourceLimits,
}

impl SecurityPolicy {
    pub fn for_tier(tier: PolicyTier) -> Self {
        match tier {
            PolicyTier::Strict => Self {
                tier,
                allowed: [Permission::ReadMessages, Permission::WriteMessages]
                    .into_iter()
                    .collect(),
                ceiling: ResourceLimits {
                    max_memory_mb: 64,
                    max_cpu_percent: 10.0,
                    max_execution_time: Duration::from_secs(5),
                    max_goroutines: 5,
                    max_connections: 2,
                },
            },
            PolicyTier::Moderate => Self {
                tier,
                allowed: [
                    Permission::ReadMessages,
                    Permission::WriteMessages,
                    Permission::ManageChannels,
                    Permission::AccessDb,
                    Permission::NetworkAccess,
                    Permission::UserData,
                ]
                .into_iter()
                .collect(),
                ceiling: ResourceLimits {
                    max_memory_mb: 256,
                    max_cpu_percent: 50.0,
                    max_execution_time: Duration::from_secs(30),
                    max_goroutines: 20,
                    max_connections: 10,
                },
            },
            PolicyTier::Permissive => Self {
                tier,
                allowed: Permission::ALL.into_iter().collect(),
                ceiling: ResourceLimits {
                    max_memory_mb: 1024,
                    max_cpu_percent: 100.0,
                    max_execution_time: Duration::from_secs(120),
                    max_goroutines: 100,
                    max_connections: 50,
                },
            },
        }
    }

    /// Clamp `limits` field-by-field to this policy's ceiling
    pub fn clamp(&self, limits: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            max_memory_mb: limits.max_memory_mb.min(self.ceiling.max_memory_mb),
            max_cpu_percent: limits.max_cpu_percent.min(self.ceiling.max_cpu_percent),
            max_execution_time: limits.max_execution_time.min(self.ceiling.max_execution_time),
            max_goroutines: limits.max_goroutines.min(self.ceiling.max_goroutines),
            max_connections: limits.max_connections.min(self.ceiling.max_connections),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_grow_monotonically() {
        let strict = SecurityPolicy::for_tier(PolicyTier::Strict);
        let moderate = SecurityPolicy::for_tier(PolicyTier::Moderate);
        let permissive = SecurityPolicy::for_tier(PolicyTier::Permissive);
        assert!(moderate.allowed.is_superset_of(&strict.allowed));
        assert!(permissive.allowed.is_superset_of(&moderate.allowed));
        assert!(!moderate.allowed.contains(Permission::ManageServer));
        assert!(strict.ceiling.max_memory_mb < moderate.ceiling.max_memory_mb);
    }

    #[test]
    fn parses_tier_names() {
        assert_eq!("STRICT".parse::<PolicyTier>(), Ok(PolicyTier::Strict));
        assert!("lax".parse::<PolicyTier>().is_err());
    }
}
