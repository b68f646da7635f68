//! Test utilities for the warden client and agent.
//!
//! This crate provides utilities to facilitate testing against a console API. See the modules for
//! all available utilities.

pub mod server;
pub mod tracing;
