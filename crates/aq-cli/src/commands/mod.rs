//! CLI subcommand implementations.

pub mod clear;
pub mod export;
pub mod ingest;
pub mod predict;
pub mod show;
pub mod status;
pub mod util;
