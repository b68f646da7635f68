//! Server-pushed events about a user's permissions.
//!
//! Events are scoped to a single user and published under the names returned by
//! [`PushEvent::permissions_updated_name`] and [`PushEvent::role_removed_name`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of `user:<id>:permissions-updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsUpdated {
    /// The user whose permissions changed.
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: String,
    /// Message to show to the user.
    #[serde(default)]
    pub message: String,
}

/// Payload of `user:<id>:role-removed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRemoved {
    /// The user that lost its role.
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: String,
    /// The removed or deactivated role.
    #[serde(default, deserialize_with = "lenient_id")]
    pub role_id: String,
    /// Display name of the role.
    #[serde(default)]
    pub role_name: String,
    /// Message to show to the user.
    #[serde(default)]
    pub message: String,
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// The user's grants changed.
    PermissionsUpdated(PermissionsUpdated),
    /// The user's role was deactivated or removed.
    RoleRemoved(RoleRemoved),
}

impl PushEvent {
    /// Event name for permission updates of `user_id`.
    pub fn permissions_updated_name(user_id: &str) -> String {
        format!("user:{user_id}:permissions-updated")
    }

    /// Event name for role removals of `user_id`.
    pub fn role_removed_name(user_id: &str) -> String {
        format!("user:{user_id}:role-removed")
    }

    /// Both event names a session for `user_id` subscribes to.
    pub fn names_for(user_id: &str) -> [String; 2] {
        [
            Self::permissions_updated_name(user_id),
            Self::role_removed_name(user_id),
        ]
    }

    /// Decodes the payload published under `name`.
    ///
    /// Returns `Ok(None)` for event names that are not permission events.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        if name.ends_with(":permissions-updated") {
            serde_json::from_value(payload)
                .map(PushEvent::PermissionsUpdated)
                .map(Some)
        } else if name.ends_with(":role-removed") {
            serde_json::from_value(payload)
                .map(PushEvent::RoleRemoved)
                .map(Some)
        } else {
            Ok(None)
        }
    }

    /// Returns the user this event is addressed to.
    pub fn user_id(&self) -> &str {
        match self {
            PushEvent::PermissionsUpdated(e) => &e.user_id,
            PushEvent::RoleRemoved(e) => &e.user_id,
        }
    }

    /// Returns the event name this event is published under.
    pub fn name(&self) -> String {
        match self {
            PushEvent::PermissionsUpdated(e) => Self::permissions_updated_name(&e.user_id),
            PushEvent::RoleRemoved(e) => Self::role_removed_name(&e.user_id),
        }
    }

    /// Serializes the payload of this event.
    pub fn payload(&self) -> Value {
        let value = match self {
            PushEvent::PermissionsUpdated(e) => serde_json::to_value(e),
            PushEvent::RoleRemoved(e) => serde_json::to_value(e),
        };
        // Both payloads are plain string structs.
        value.unwrap_or(Value::Null)
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
