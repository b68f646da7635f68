//! Reference data describing every permission the console knows about.

use serde::{Deserialize, Serialize};

/// One entry of the permission catalog.
///
/// The `id` is the grant string (`"<subject>:<action>"`) that users and roles carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Grant string identifying this permission.
    #[serde(alias = "_id")]
    pub id: String,
    /// Owning module, used to group entries for display.
    #[serde(alias = "category")]
    pub module: String,
    /// Human readable name.
    pub name: String,
}
