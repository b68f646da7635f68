use std::collections::{BTreeSet, HashMap};

use reqwest::Method;
use serde::Serialize;
use warden_types::Grant;

use crate::Ability;

/// Routes callable without any grant.
pub const PUBLIC_ROUTES: &[&str] = &[
    "/auth/login",
    "/auth/logout",
    "/auth/me",
    "/auth/refresh",
    "/auth/profile",
];

/// The console's API permission routing table: method, normalized path and required grant.
pub const ROUTES: &[(&str, &str, &str)] = &[
    // users
    ("GET", "/users", "user-management:view"),
    ("POST", "/users", "user-management:create"),
    ("PUT", "/users", "user-management:update"),
    ("PATCH", "/users", "user-management:update"),
    ("DELETE", "/users", "user-management:delete"),
    ("PATCH", "/users/activate", "user-management:update"),
    ("PATCH", "/users/deactivate", "user-management:update"),
    ("POST", "/users/reset-password", "user-management:update"),
    // roles
    ("GET", "/roles", "role-management:view"),
    ("POST", "/roles", "role-management:create"),
    ("PUT", "/roles", "role-management:update"),
    ("PATCH", "/roles", "role-management:update"),
    ("DELETE", "/roles", "role-management:delete"),
    ("PUT", "/roles/permissions", "role-management:update"),
    ("GET", "/permissions", "role-management:view"),
    // companies
    ("GET", "/companies", "company-management:view"),
    ("POST", "/companies", "company-management:create"),
    ("PUT", "/companies", "company-management:update"),
    ("PATCH", "/companies", "company-management:update"),
    ("DELETE", "/companies", "company-management:delete"),
    // job titles
    ("GET", "/job-titles", "job-title-management:view"),
    ("POST", "/job-titles", "job-title-management:create"),
    ("PUT", "/job-titles", "job-title-management:update"),
    ("PATCH", "/job-titles", "job-title-management:update"),
    ("DELETE", "/job-titles", "job-title-management:delete"),
    // departments
    ("GET", "/departments", "department-management:view"),
    ("POST", "/departments", "department-management:create"),
    ("PUT", "/departments", "department-management:update"),
    ("PATCH", "/departments", "department-management:update"),
    ("DELETE", "/departments", "department-management:delete"),
    // permits
    ("GET", "/permits", "permit-management:view"),
    ("POST", "/permits", "permit-management:create"),
    ("PUT", "/permits", "permit-management:update"),
    ("PATCH", "/permits", "permit-management:update"),
    ("DELETE", "/permits", "permit-management:delete"),
    ("POST", "/permits/approve", "permit-management:approve"),
    ("POST", "/permits/reject", "permit-management:reject"),
    // history
    ("GET", "/history", "history:view"),
    ("GET", "/history/users", "user-management:view"),
    ("GET", "/history/roles", "role-management:view"),
    ("GET", "/history/companies", "company-management:view"),
    ("GET", "/history/job-titles", "job-title-management:view"),
    ("GET", "/history/departments", "department-management:view"),
    ("GET", "/history/permits", "permit-management:view"),
];

/// Returns `true` for 24 character hex identifiers.
fn is_object_id(segment: &str) -> bool {
    segment.len() == 24 && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalizes an API path for table lookup.
///
/// Strips the query string, fragment and trailing slash, drops identifier segments and collapses
/// history and revision variants of a resource to `/history/<resource>`.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && !is_object_id(segment))
        .collect();

    if let ["history", resource, ..] | [resource, "history" | "revisions", ..] = segments[..] {
        segments = vec!["history", resource];
    }

    format!("/{}", segments.join("/"))
}

/// What an outbound call requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The route is on the allow-list.
    Public,
    /// The route requires a grant.
    Grant(Grant),
    /// The route is unknown and therefore denied.
    Unmapped,
}

/// Lookup table from `"<METHOD> <normalized-path>"` to the required grant.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Grant>,
    public: BTreeSet<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (method, path, grant) in ROUTES {
            match grant.parse() {
                Ok(grant) => table.insert(method, path, grant),
                Err(err) => tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "invalid grant in routing table"
                ),
            }
        }
        for path in PUBLIC_ROUTES {
            table.allow(path);
        }
        table
    }
}

impl RouteTable {
    /// Creates a table without routes; every call is denied.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            public: BTreeSet::new(),
        }
    }

    fn key(method: &str, path: &str) -> String {
        format!("{} {}", method.to_ascii_uppercase(), normalize_path(path))
    }

    /// Maps `method` on `path` to `grant`.
    pub fn insert(&mut self, method: &str, path: &str, grant: Grant) {
        self.routes.insert(Self::key(method, path), grant);
    }

    /// Adds `path` to the allow-list for all methods.
    pub fn allow(&mut self, path: &str) {
        self.public.insert(normalize_path(path));
    }

    /// Returns the requirement for `method` on `path`.
    pub fn lookup(&self, method: &str, path: &str) -> Requirement {
        if let Some(grant) = self.routes.get(&Self::key(method, path)) {
            return Requirement::Grant(grant.clone());
        }
        if self.public.contains(&normalize_path(path)) {
            return Requirement::Public;
        }
        Requirement::Unmapped
    }

    /// Returns the number of mapped routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are mapped.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// An outbound call rejected by the [`ApiGuard`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error(
    "permission denied: {method} {path} requires {}",
    .required.as_ref().map_or_else(|| "an allow-listed route".to_owned(), Grant::to_string)
)]
pub struct PermissionDenied {
    /// HTTP method of the rejected call.
    pub method: String,
    /// Path of the rejected call, as requested.
    pub path: String,
    /// The grant that would have been required, `None` for unmapped routes.
    pub required: Option<Grant>,
}

/// Gates outbound API calls on the current ability.
#[derive(Debug, Clone, Default)]
pub struct ApiGuard {
    table: RouteTable,
}

impl ApiGuard {
    /// Creates a guard over `table`.
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    /// Returns the routing table.
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Returns what calling `method` on `path` requires.
    pub fn required(&self, method: &Method, path: &str) -> Requirement {
        self.table.lookup(method.as_str(), path)
    }

    /// Authorizes calling `method` on `path` with `ability`.
    pub fn authorize(
        &self,
        method: &Method,
        path: &str,
        ability: &Ability,
    ) -> Result<(), PermissionDenied> {
        let required = match self.required(method, path) {
            Requirement::Public => return Ok(()),
            Requirement::Grant(grant) if ability.allows(&grant) => return Ok(()),
            Requirement::Grant(grant) => Some(grant),
            Requirement::Unmapped => None,
        };

        let denied = PermissionDenied {
            method: method.to_string(),
            path: path.to_owned(),
            required,
        };
        tracing::debug!(error = &denied as &dyn std::error::Error, "blocked API call");
        Err(denied)
    }
}
