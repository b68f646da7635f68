use std::sync::{Arc, Mutex};

use warden_types::Grant;

use crate::{Ability, AbilityCache, Snapshot};

/// How a route participates in capability checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteKind {
    /// A regular page behind capability checks.
    #[default]
    Protected,
    /// Reachable without a session, e.g. the sign-in page.
    Guest,
    /// Error pages.
    Error,
    /// The landing page.
    Landing,
}

/// Route metadata consumed by the [`CapabilityGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    /// Route path.
    pub path: String,
    /// Kind of the route.
    pub kind: RouteKind,
    /// Capability required to render the route.
    pub requirement: Option<Grant>,
}

impl RouteMeta {
    /// Creates a protected route without a requirement.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: RouteKind::Protected,
            requirement: None,
        }
    }

    /// Sets the kind of the route.
    pub fn kind(mut self, kind: RouteKind) -> Self {
        self.kind = kind;
        self
    }

    /// Requires `action` on `subject` to render the route.
    pub fn requires(mut self, action: &str, subject: &str) -> Self {
        self.requirement = Some(Grant::new(subject, action));
        self
    }
}

/// Outcome of a capability check.
#[derive(Debug, Clone)]
pub enum CapabilityDecision {
    /// The route is exempt from checks.
    Bypass,
    /// The check passed. The ability is handed to descendants for element-level checks.
    Granted(Arc<Ability>),
    /// The check failed but enforcement is off. Render anyway and let elements hide themselves.
    SoftDenied(Arc<Ability>),
    /// The check failed and enforcement is on.
    Denied {
        /// The capability the route requires.
        required: Grant,
    },
}

impl CapabilityDecision {
    /// Returns `true` if the route should be rendered.
    pub fn renders(&self) -> bool {
        !matches!(self, CapabilityDecision::Denied { .. })
    }

    /// Returns the ability exposed to descendants.
    pub fn ability(&self) -> Option<&Arc<Ability>> {
        match self {
            CapabilityDecision::Granted(ability) | CapabilityDecision::SoftDenied(ability) => {
                Some(ability)
            }
            CapabilityDecision::Bypass | CapabilityDecision::Denied { .. } => None,
        }
    }
}

/// Page-level capability guard.
///
/// Failed checks are always logged. Whether they block rendering depends on `enforce`: off by
/// default, in which case the guard only supplies the ability and individual elements decide.
#[derive(Debug, Default)]
pub struct CapabilityGuard {
    enforce: bool,
    cache: Mutex<AbilityCache>,
}

impl CapabilityGuard {
    /// Creates a guard.
    pub fn new(enforce: bool) -> Self {
        Self {
            enforce,
            cache: Mutex::new(AbilityCache::new()),
        }
    }

    /// Returns `true` if failed checks block rendering.
    pub fn is_enforcing(&self) -> bool {
        self.enforce
    }

    /// Checks `route` against the session in `snapshot`.
    pub fn check(&self, route: &RouteMeta, snapshot: &Snapshot) -> CapabilityDecision {
        if route.kind != RouteKind::Protected {
            return CapabilityDecision::Bypass;
        }

        // NB: The cache is only locked for the duration of a rebuild, a panic in there is a bug.
        let ability = self.cache.lock().unwrap().get(snapshot);
        let Some(required) = &route.requirement else {
            return CapabilityDecision::Granted(ability);
        };

        if ability.allows(required) {
            return CapabilityDecision::Granted(ability);
        }

        tracing::debug!(
            route = %route.path,
            %required,
            enforce = self.enforce,
            "capability check failed"
        );

        if self.enforce {
            CapabilityDecision::Denied {
                required: required.clone(),
            }
        } else {
            CapabilityDecision::SoftDenied(ability)
        }
    }
}
