//! # Warden Client
//!
//! The client keeps a console session's authorization state correct while permissions change
//! underneath it. It consists of:
//!
//!  - the [`Ability`] model, answering "can this user perform `action` on `subject`",
//!  - the [`SessionStore`], the single owner of the signed-in user record,
//!  - [refresh triggers](triggers) that re-pull the user record on a timer, on window focus,
//!    on server push, or on demand,
//!  - [guards](guard) that gate page access, navigation entries and outbound API calls,
//!  - the [`PermissionDirectory`], a cached catalog of every known permission.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_client::{Credentials, HttpBackend, MemoryTokenStore, SessionConfig, SessionStore};
//!
//! # async fn example() -> warden_client::Result<()> {
//! let backend = HttpBackend::builder("http://localhost:3000/api/").build()?;
//! let session = SessionStore::new(
//!     Arc::new(backend),
//!     Arc::new(MemoryTokenStore::default()),
//!     SessionConfig::default(),
//! );
//!
//! session.login(&Credentials::new("admin", "hunter2")).await?;
//! if session.has_permission("company-management", "view") {
//!     // render the companies screen
//! }
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod ability;
mod backend;
mod directory;
mod error;
pub mod guard;
pub mod push;
mod session;
mod token;
pub mod triggers;

pub use ability::*;
pub use backend::*;
pub use directory::*;
pub use error::*;
pub use session::*;
pub use token::*;

pub use reqwest::Method;
pub use warden_types as types;

#[cfg(test)]
mod testutil;
