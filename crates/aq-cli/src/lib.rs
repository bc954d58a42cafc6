//! academIQ CLI library.
//!
//! This crate provides the command-line front end for the aggregator: it
//! replays wire messages, inspects the persisted snapshot and talks to the
//! prediction backend.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
