//! Guards consuming the session's ability.
//!
//! All guards are pure functions of a [`Snapshot`](crate::Snapshot) or an
//! [`Ability`](crate::Ability). They never write to the session and never suspend, except for
//! [`GuardedClient`], which dispatches the request once the API-call guard has passed.

mod api;
mod auth;
mod capability;
mod client;
mod nav;

pub use api::*;
pub use auth::*;
pub use capability::*;
pub use client::*;
pub use nav::*;
