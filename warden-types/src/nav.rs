//! Navigation descriptors.

use serde::{Deserialize, Serialize};

use crate::grant::Grant;

/// A single entry of the console's navigation menu.
///
/// Entries without both `action` and `subject` are accessible to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavEntry {
    /// Menu label.
    pub title: String,
    /// Route the entry links to.
    pub path: String,
    /// Icon identifier.
    #[serde(default)]
    pub icon: String,
    /// Action required to see the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Subject required to see the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl NavEntry {
    /// Creates an entry that is visible to everyone.
    pub fn new(title: impl Into<String>, path: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            path: path.into(),
            icon: icon.into(),
            action: None,
            subject: None,
        }
    }

    /// Restricts the entry to users that may perform `action` on `subject`.
    pub fn requires(mut self, action: impl Into<String>, subject: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self.subject = Some(subject.into());
        self
    }

    /// Returns the grant required to see this entry, if any.
    ///
    /// A requirement is only in effect when both halves are present.
    pub fn requirement(&self) -> Option<Grant> {
        match (&self.action, &self.subject) {
            (Some(action), Some(subject)) => Some(Grant::new(subject.as_str(), action)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_needs_both_halves() {
        let open = NavEntry::new("Home", "/", "home");
        assert_eq!(open.requirement(), None);

        let mut half = open.clone();
        half.action = Some("view".into());
        assert_eq!(half.requirement(), None);

        let guarded = open.requires("view", "company-management");
        assert_eq!(
            guarded.requirement(),
            Some(Grant::new("company-management", "view"))
        );
    }
}
