use std::collections::BTreeSet;
use std::sync::Arc;

use warden_types::{Grant, User, actions};

use crate::Snapshot;

/// A queryable capability set derived from a user record.
///
/// Abilities are built with [`Ability::build`] and never mutated afterwards. When the user
/// record changes, a new ability is built from the new record; see [`AbilityCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ability {
    universal: bool,
    rules: BTreeSet<Grant>,
}

impl Ability {
    /// An ability that denies everything.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// An ability with a single universal `manage:all` rule.
    pub fn allow_all() -> Self {
        Self {
            universal: true,
            rules: BTreeSet::from([Grant::universal()]),
        }
    }

    /// Derives the ability of `user`.
    ///
    /// - Without a user, everything is denied.
    /// - A user with full permission, or whose role has full permission or is a super admin,
    ///   gets the universal rule.
    /// - Otherwise every well-formed grant of the user and its role becomes one rule.
    ///   Malformed grant strings are skipped.
    pub fn build(user: Option<&User>) -> Self {
        let Some(user) = user else {
            return Self::deny_all();
        };

        if user.has_full_access() {
            return Self::allow_all();
        }

        let mut rules = BTreeSet::new();
        for grant in user.grants() {
            match grant {
                Ok(grant) => {
                    rules.insert(grant);
                }
                Err(error) => {
                    tracing::trace!(user = %user.id, %error, "skipping malformed grant");
                }
            }
        }

        Self {
            universal: rules.iter().any(Grant::is_universal),
            rules,
        }
    }

    /// Returns whether `action` may be performed on `subject`.
    ///
    /// There is no wildcard or hierarchy matching: the universal rule allows everything, every
    /// other rule only allows its exact pair.
    pub fn can(&self, action: &str, subject: &str) -> bool {
        self.universal || self.rules.iter().any(|rule| rule.matches(action, subject))
    }

    /// Returns whether `grant` is authorized.
    pub fn allows(&self, grant: &Grant) -> bool {
        self.can(grant.action(), grant.subject())
    }

    /// Shorthand for `can("view", subject)`.
    pub fn can_access(&self, subject: &str) -> bool {
        self.can(actions::VIEW, subject)
    }

    /// Shorthand for `can("create", subject)`.
    pub fn can_create(&self, subject: &str) -> bool {
        self.can(actions::CREATE, subject)
    }

    /// Shorthand for `can("update", subject)`.
    pub fn can_update(&self, subject: &str) -> bool {
        self.can(actions::UPDATE, subject)
    }

    /// Shorthand for `can("delete", subject)`.
    pub fn can_delete(&self, subject: &str) -> bool {
        self.can(actions::DELETE, subject)
    }

    /// Returns `true` if this ability holds the universal rule.
    pub fn is_universal(&self) -> bool {
        self.universal
    }

    /// Iterates the rules of this ability in stable order.
    pub fn rules(&self) -> impl Iterator<Item = &Grant> {
        self.rules.iter()
    }
}

/// Caches the [`Ability`] derived from a session snapshot.
///
/// The cache remembers the grants version of the snapshot it last built from and only rebuilds
/// when a snapshot with a different grants version is passed in.
#[derive(Debug, Default)]
pub struct AbilityCache {
    built: Option<(u64, Arc<Ability>)>,
}

impl AbilityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ability for `snapshot`, rebuilding it if the snapshot's grants changed.
    pub fn get(&mut self, snapshot: &Snapshot) -> Arc<Ability> {
        let version = snapshot.grants_version();
        if let Some((built_version, ability)) = &self.built
            && *built_version == version
        {
            return Arc::clone(ability);
        }

        let ability = Arc::new(Ability::build(snapshot.user()));
        self.built = Some((version, Arc::clone(&ability)));
        ability
    }
}
