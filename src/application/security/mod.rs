//! Security manager - capability checks and content sanitization
//!
//! Validation happens twice: once against the whole manifest before an
//! extension is loaded, and again on every command dispatch against the
//! permissions that manifest granted.

pub mod policy;
pub mod sanitize;

pub use policy::{PolicyTier, SecurityPolicy};
pub use sanitize::Sanitizer;

use crate::application::errors::PluginError;
use crate::domain::entities::{
    Command, Permission, PermissionSet, PluginManifest, ResourceLimits, Response,
};

/// Validates manifests and invocations against the active policy tier
#[derive(Debug, Clone)]
pub struct SecurityManager {
    policy: SecurityPolicy,
    defaults: ResourceLimits,
    sanitizer: Sanitizer,
}

impl SecurityManager {
    /// `defaults` fill in limits a manifest omits; they are clamped to the tier ceiling
    pub fn new(policy: SecurityPolicy, defaults: ResourceLimits) -> Self {
        let defaults = policy.clamp(&defaults);
        Self {
            policy,
            defaults,
            sanitizer: Sanitizer::default(),
        }
    }

    pub fn for_tier(tier: PolicyTier) -> Self {
        Self::new(SecurityPolicy::for_tier(tier), ResourceLimits::default())
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn default_limits(&self) -> &ResourceLimits {
        &self.defaults
    }

    /// Validate a manifest before load and return its effective resource limits.
    ///
    /// Unlisted permissions fail closed with `PermissionDenied`; declared limits
    /// above the policy ceiling fail with `ResourceLimitExceeded`.
    pub fn validate_manifest(&self, manifest: &PluginManifest) -> Result<ResourceLimits, PluginError> {
        manifest.validate_structure()?;

        for permission in &manifest.permissions {
            if !self.policy.allowed.contains(*permission) {
                tracing::warn!(
                    plugin = %manifest.name,
                    permission = %permission,
                    tier = %self.policy.tier,
                    "Manifest requests a permission outside the policy allow-list"
                );
                return Err(PluginError::permission_denied(&manifest.name, permission));
            }
        }

        let limits = manifest.resources.resolve(&self.defaults);
        self.check_ceiling(&manifest.name, &limits)?;
        Ok(limits)
    }

    fn check_ceiling(&self, plugin: &str, limits: &ResourceLimits) -> Result<(), PluginError> {
        let ceiling = &self.policy.ceiling;
        let exceeded = |resource: &str, declared: String, max: String| PluginError::ResourceLimitExceeded {
            plugin: plugin.to_string(),
            resource: resource.to_string(),
            detail: format!("declared {}, {} policy allows {}", declared, self.policy.tier, max),
        };

        if limits.max_memory_mb > ceiling.max_memory_mb {
            return Err(exceeded(
                "memory",
                format!("{}MB", limits.max_memory_mb),
                format!("{}MB", ceiling.max_memory_mb),
            ));
        }
        if limits.max_cpu_percent > ceiling.max_cpu_percent {
            return Err(exceeded(
                "cpu",
                format!("{}%", limits.max_cpu_percent),
                format!("{}%", ceiling.max_cpu_percent),
            ));
        }
        if limits.max_execution_time > ceiling.max_execution_time {
            return Err(exceeded(
                "execution time",
                format!("{:?}", limits.max_execution_time),
                format!("{:?}", ceiling.max_execution_time),
            ));
        }
        if limits.max_goroutines > ceiling.max_goroutines {
            return Err(exceeded(
                "concurrency",
                limits.max_goroutines.to_string(),
                ceiling.max_goroutines.to_string(),
            ));
        }
        if limits.max_connections > ceiling.max_connections {
            return Err(exceeded(
                "connections",
                limits.max_connections.to_string(),
                ceiling.max_connections.to_string(),
            ));
        }
        Ok(())
    }

    /// Dispatch-time check: the extension's granted set must cover `required`
    pub fn check_command_permissions(
        &self,
        plugin: &str,
        granted: &PermissionSet,
        required: &[Permission],
    ) -> Result<(), PluginError> {
        match granted.missing(required).first() {
            Some(missing) => Err(PluginError::permission_denied(plugin, missing)),
            None => Ok(()),
        }
    }

    pub fn check_permission(
        &self,
        plugin: &str,
        granted: &PermissionSet,
        permission: Permission,
    ) -> Result<(), PluginError> {
        self.check_command_permissions(plugin, granted, &[permission])
    }

    pub fn sanitize_content(&self, text: &str) -> String {
        self.sanitizer.sanitize(text)
    }

    pub fn sanitize_value(&self, value: serde_json::Value) -> serde_json::Value {
        self.sanitizer.sanitize_value(value)
    }

    /// Sanitize the free text of a command before it reaches a handler
    pub fn sanitize_command(&self, mut command: Command) -> Command {
        command.args = command.args.iter().map(|a| self.sanitize_content(a)).collect();
        command.options = command
            .options
            .into_iter()
            .map(|(k, v)| (k, self.sanitize_value(v)))
            .collect();
        command
    }

    /// Sanitize everything textual in a handler's response
    pub fn sanitize_response(&self, mut response: Response) -> Response {
        response.content = self.sanitize_content(&response.content);
        for embed in &mut response.embeds {
            embed.title = embed.title.as_deref().map(|t| self.sanitize_content(t));
            embed.description = embed.description.as_deref().map(|d| self.sanitize_content(d));
            embed.footer = embed.footer.as_deref().map(|f| self.sanitize_content(f));
            for field in &mut embed.fields {
                field.name = self.sanitize_content(&field.name);
                field.value = self.sanitize_content(&field.value);
            }
        }
        response
    }
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::for_tier(PolicyTier::default())
    }
}
