//! Data model shared by the console client, the agent and the test utilities.
//!
//! Everything in here mirrors what the console API sends over the wire. Values are normalized
//! at the deserialization boundary so that downstream code only ever sees one representation:
//! grant strings are parsed into [`Grant`]s, the `read` action is folded into `view`, and both
//! role permission formats are exposed through [`RolePermissions::grants`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod catalog;
pub mod event;
pub mod grant;
pub mod nav;
pub mod user;

pub use catalog::PermissionEntry;
pub use event::{PermissionsUpdated, PushEvent, RoleRemoved};
pub use grant::{Grant, InvalidGrantError, actions, subjects};
pub use nav::NavEntry;
pub use user::{Role, RolePermissions, User, UserPatch};
