//! Users and the roles attached to them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grant::{Grant, InvalidGrantError};

/// A console user together with the authorization state embedded in its record.
///
/// The client never edits authorization fields locally; the record is replaced wholesale by the
/// server's canonical copy on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Server-side identifier.
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Given name, for display.
    #[serde(default, rename = "firstName")]
    pub first_name: String,
    /// Family name, for display.
    #[serde(default, rename = "lastName")]
    pub last_name: String,
    /// Contact address.
    #[serde(default)]
    pub email: String,
    /// Direct grants in `"<subject>:<action>"` form.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Override that grants every action on every subject.
    #[serde(default)]
    pub has_full_permission: bool,
    /// Optional role bundling further grants.
    #[serde(default)]
    pub role: Option<Role>,
    /// Deactivated users are treated as signed out by the authentication guard.
    #[serde(default, rename = "isActive", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl User {
    /// Returns `true` if the user or its role short-circuits to universal access.
    pub fn has_full_access(&self) -> bool {
        self.has_full_permission || self.role.as_ref().is_some_and(Role::has_full_access)
    }

    /// Returns `true` unless the record explicitly marks the user as inactive.
    pub fn is_active(&self) -> bool {
        self.is_active != Some(false)
    }

    /// Display name assembled from first and last name, falling back to the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_owned()
        }
    }

    /// Parses every direct and role grant of this user.
    ///
    /// Malformed entries are yielded as errors so the caller can decide whether to skip them.
    pub fn grants(&self) -> impl Iterator<Item = Result<Grant, InvalidGrantError>> + '_ {
        let direct = self.permissions.iter().map(|p| p.parse());
        let role = self
            .role
            .iter()
            .flat_map(|role| role.permissions.grants());
        direct.chain(role)
    }

    /// Merges a partial record into this user.
    pub fn apply(&mut self, patch: UserPatch) {
        let UserPatch {
            username,
            first_name,
            last_name,
            email,
            permissions,
            has_full_permission,
            role,
            is_active,
        } = patch;

        if let Some(username) = username {
            self.username = username;
        }
        if let Some(first_name) = first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = last_name {
            self.last_name = last_name;
        }
        if let Some(email) = email {
            self.email = email;
        }
        if let Some(permissions) = permissions {
            self.permissions = permissions;
        }
        if let Some(has_full_permission) = has_full_permission {
            self.has_full_permission = has_full_permission;
        }
        if let Some(role) = role {
            self.role = role;
        }
        if let Some(is_active) = is_active {
            self.is_active = Some(is_active);
        }
    }
}

/// A partial user record, as produced by profile edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    /// New login name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New given name.
    #[serde(default, rename = "firstName", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(default, rename = "lastName", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// New contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Replacement direct grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Replacement full-permission flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_full_permission: Option<bool>,
    /// Replacement role; `Some(None)` detaches the role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Option<Role>>,
    /// Replacement activation flag.
    #[serde(default, rename = "isActive", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl UserPatch {
    /// Returns `true` if applying this patch can change what the user is authorized for.
    pub fn touches_permissions(&self) -> bool {
        self.permissions.is_some() || self.has_full_permission.is_some() || self.role.is_some()
    }
}

/// A named bundle of grants attached to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Server-side identifier.
    #[serde(default, alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Grants of this role, in either wire format.
    #[serde(default)]
    pub permissions: RolePermissions,
    /// Override that grants every action on every subject.
    #[serde(default)]
    pub has_full_permission: bool,
    /// Super administrators are granted every action on every subject.
    #[serde(default, rename = "isSuperAdmin")]
    pub is_super_admin: bool,
    /// Whether the role is currently enabled.
    #[serde(default = "default_true", rename = "isActive")]
    pub is_active: bool,
}

impl Default for Role {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            permissions: RolePermissions::default(),
            has_full_permission: false,
            is_super_admin: false,
            is_active: true,
        }
    }
}

impl Role {
    /// Returns `true` if the role short-circuits to universal access.
    pub fn has_full_access(&self) -> bool {
        self.has_full_permission || self.is_super_admin
    }
}

/// The two coexisting formats in which a role's grants are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RolePermissions {
    /// A flat list of `"<subject>:<action>"` strings.
    Flat(Vec<String>),
    /// A `{subject: {action: bool}}` map; only `true` entries grant anything.
    Grouped(BTreeMap<String, BTreeMap<String, bool>>),
}

impl Default for RolePermissions {
    fn default() -> Self {
        RolePermissions::Flat(Vec::new())
    }
}

impl RolePermissions {
    /// Normalizes either format into a sequence of parsed grants.
    pub fn grants(&self) -> Vec<Result<Grant, InvalidGrantError>> {
        match self {
            RolePermissions::Flat(list) => list.iter().map(|p| p.parse()).collect(),
            RolePermissions::Grouped(map) => map
                .iter()
                .flat_map(|(subject, actions)| {
                    actions
                        .iter()
                        .filter(|(_, granted)| **granted)
                        .map(move |(action, _)| Ok(Grant::new(subject.as_str(), action)))
                })
                .collect(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        String(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::String(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_wire_record() {
        let user: User = serde_json::from_value(json!({
            "_id": "507f1f77bcf86cd799439011",
            "username": "jdoe",
            "firstName": "Jane",
            "lastName": "Doe",
            "permissions": ["company-management:view"],
            "has_full_permission": false,
            "isActive": true,
            "role": {
                "_id": "64b7f1f77bcf86cd79943901",
                "name": "Auditor",
                "permissions": {"permit-management": {"view": true, "delete": false}},
                "isSuperAdmin": false
            }
        }))
        .unwrap();

        assert_eq!(user.id, "507f1f77bcf86cd799439011");
        assert_eq!(user.display_name(), "Jane Doe");
        assert!(user.is_active());
        assert!(!user.has_full_access());

        let role = user.role.as_ref().unwrap();
        assert!(role.is_active);
        assert!(matches!(role.permissions, RolePermissions::Grouped(_)));
    }

    #[test]
    fn numeric_ids_become_strings() {
        let user: User = serde_json::from_value(json!({"id": 42})).unwrap();
        assert_eq!(user.id, "42");
        assert!(user.is_active());
        assert_eq!(user.role, None);
    }

    #[test]
    fn only_explicit_false_deactivates() {
        let user: User = serde_json::from_value(json!({"id": "1", "isActive": false})).unwrap();
        assert!(!user.is_active());
    }

    #[test]
    fn grouped_role_grants_only_true_entries() {
        let role: Role = serde_json::from_value(json!({
            "permissions": {
                "users": {"read": true, "delete": false},
                "permits": {"approve": true}
            }
        }))
        .unwrap();

        let grants: Vec<_> = role.permissions.grants().into_iter().collect();
        assert_eq!(
            grants,
            vec![
                Ok(Grant::new("permits", "approve")),
                Ok(Grant::new("users", "view")),
            ]
        );
    }

    #[test]
    fn user_grants_chain_direct_and_role_entries() {
        let user: User = serde_json::from_value(json!({
            "id": "1",
            "permissions": ["users:view", "garbage"],
            "role": {"permissions": ["permits:create"]}
        }))
        .unwrap();

        let (ok, err): (Vec<_>, Vec<_>) = user.grants().partition(Result::is_ok);
        assert_eq!(ok.len(), 2);
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn role_flags_grant_full_access() {
        let mut user: User = serde_json::from_value(json!({"id": "1"})).unwrap();
        assert!(!user.has_full_access());

        user.role = Some(Role {
            is_super_admin: true,
            ..Default::default()
        });
        assert!(user.has_full_access());

        user.role = Some(Role {
            has_full_permission: true,
            ..Default::default()
        });
        assert!(user.has_full_access());
    }

    #[test]
    fn patch_merges_present_fields() {
        let mut user: User =
            serde_json::from_value(json!({"id": "1", "firstName": "A", "email": "a@x"})).unwrap();

        let patch = UserPatch {
            first_name: Some("B".into()),
            ..Default::default()
        };
        assert!(!patch.touches_permissions());
        user.apply(patch);

        assert_eq!(user.first_name, "B");
        assert_eq!(user.email, "a@x");

        let patch = UserPatch {
            role: Some(None),
            ..Default::default()
        };
        assert!(patch.touches_permissions());
    }
}
