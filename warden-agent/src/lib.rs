//! A headless console agent.
//!
//! The agent signs in to the console, keeps the session's permissions fresh with the configured
//! refresh triggers and answers permission queries from the command line. See [`cli`] for the
//! available commands and [`config`] for configuration.

pub mod cli;
pub mod config;
pub mod console;
pub mod observability;
