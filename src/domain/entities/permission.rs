//! Capability tags an extension declares in its manifest

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Permission types that an extension can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Receive chat messages
    ReadMessages,
    /// Send or modify chat messages
    WriteMessages,
    /// Create, edit and delete channels
    ManageChannels,
    /// Use the host database façade
    AccessDb,
    /// Make outbound network requests
    NetworkAccess,
    /// Touch the local filesystem
    FilesystemAccess,
    /// Read user profile data
    UserData,
    /// Administer the server itself
    ManageServer,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::ReadMessages,
        Permission::WriteMessages,
        Permission::ManageChannels,
        Permission::AccessDb,
        Permission::NetworkAccess,
        Permission::FilesystemAccess,
        Permission::UserData,
        Permission::ManageServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadMessages => "read-messages",
            Permission::WriteMessages => "write-messages",
            Permission::ManageChannels => "manage-channels",
            Permission::AccessDb => "access-db",
            Permission::NetworkAccess => "network-access",
            Permission::FilesystemAccess => "filesystem-access",
            Permission::UserData => "user-data",
            Permission::ManageServer => "manage-server",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

/// Ordered, de-duplicated set of permissions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    /// Permissions in `required` this set does not grant
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a Permission>) -> Vec<Permission> {
        let mut missing: Vec<Permission> = required
            .into_iter()
            .filter(|p| !self.0.contains(p))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn is_superset_of<'a>(&self, required: impl IntoIterator<Item = &'a Permission>) -> bool {
        self.missing(required).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a Permission;
    type IntoIter = std::collections::btree_set::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|p| p.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_names() {
        assert_eq!("access-db".parse::<Permission>(), Ok(Permission::AccessDb));
        assert!("root".parse::<Permission>().is_err());
        let parsed: Vec<Permission> = serde_yaml::from_str("[read-messages, manage-server]").unwrap();
        assert_eq!(parsed, vec![Permission::ReadMessages, Permission::ManageServer]);
    }

    #[test]
    fn missing_reports_ungranted_permissions() {
        let granted: PermissionSet = [Permission::ReadMessages, Permission::WriteMessages]
            .into_iter()
            .collect();
        let required = [Permission::WriteMessages, Permission::AccessDb, Permission::AccessDb];
        assert_eq!(granted.missing(&required), vec![Permission::AccessDb]);
        assert!(granted.is_superset_of(&[Permission::ReadMessages]));
        assert!(granted.is_superset_of(&[]));
    }
}
