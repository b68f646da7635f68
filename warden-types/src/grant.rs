//! Grants are `(subject, action)` pairs written as `"<subject>:<action>"` on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Well-known actions.
pub mod actions {
    /// Read access to a subject. The wire alias `read` is normalized to this.
    pub const VIEW: &str = "view";
    /// Create new records of a subject.
    pub const CREATE: &str = "create";
    /// Modify existing records of a subject.
    pub const UPDATE: &str = "update";
    /// Delete records of a subject.
    pub const DELETE: &str = "delete";
    /// Sentinel action of the universal grant.
    pub const MANAGE: &str = "manage";
}

/// Well-known subjects.
pub mod subjects {
    /// Sentinel subject of the universal grant.
    pub const ALL: &str = "all";
    /// Users screen and `/users` API family.
    pub const USERS: &str = "user-management";
    /// Roles screen, `/roles` and `/permissions` API families.
    pub const ROLES: &str = "role-management";
    /// Companies screen and `/companies` API family.
    pub const COMPANIES: &str = "company-management";
    /// Job titles screen and `/job-titles` API family.
    pub const JOB_TITLES: &str = "job-title-management";
    /// Departments screen and `/departments` API family.
    pub const DEPARTMENTS: &str = "department-management";
    /// Permits screen and `/permits` API family.
    pub const PERMITS: &str = "permit-management";
    /// Global change history.
    pub const HISTORY: &str = "history";
}

/// Folds wire aliases into their canonical action name.
pub fn normalize_action(action: &str) -> &str {
    match action {
        "read" => actions::VIEW,
        other => other,
    }
}

/// Error returned when a grant string is not of the form `"<subject>:<action>"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidGrantError {
    /// There is no `:` separator.
    #[error("grant `{0}` is missing the `:` separator")]
    MissingSeparator(String),
    /// Subject or action is empty.
    #[error("grant `{0}` has an empty subject or action")]
    Empty(String),
    /// The action contains another `:`.
    #[error("grant `{0}` has more than one `:` separator")]
    TooManySeparators(String),
}

/// A single `(subject, action)` authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grant {
    subject: String,
    action: String,
}

impl Grant {
    /// Creates a grant, normalizing the action.
    pub fn new(subject: impl Into<String>, action: &str) -> Self {
        Self {
            subject: subject.into(),
            action: normalize_action(action).to_owned(),
        }
    }

    /// The universal `manage:all` grant.
    pub fn universal() -> Self {
        Self::new(subjects::ALL, actions::MANAGE)
    }

    /// Returns the subject of this grant.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the (normalized) action of this grant.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns `true` for the `manage:all` sentinel pair.
    pub fn is_universal(&self) -> bool {
        self.subject == subjects::ALL && self.action == actions::MANAGE
    }

    /// Returns `true` if this grant authorizes exactly `(action, subject)`.
    pub fn matches(&self, action: &str, subject: &str) -> bool {
        self.subject == subject && self.action == normalize_action(action)
    }
}

impl FromStr for Grant {
    type Err = InvalidGrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((subject, action)) = s.split_once(':') else {
            return Err(InvalidGrantError::MissingSeparator(s.to_owned()));
        };
        if subject.is_empty() || action.is_empty() {
            return Err(InvalidGrantError::Empty(s.to_owned()));
        }
        if action.contains(':') {
            return Err(InvalidGrantError::TooManySeparators(s.to_owned()));
        }
        Ok(Self::new(subject, action))
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.action)
    }
}

impl Serialize for Grant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Grant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
