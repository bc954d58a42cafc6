//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Course engagement aggregator.
///
/// Aggregates LMS activity messages (page views, interactions, grades and
/// materials) into per-course metrics and a behavior summary.
#[derive(Debug, Parser)]
#[command(name = "aq", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Feed newline-delimited JSON messages into the aggregator.
    Ingest {
        /// Read messages from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show a summary of the aggregated data.
    Status,

    /// Print the full snapshot as JSON.
    Show,

    /// Print the sanitized export sent to the prediction backend.
    Export {
        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,
    },

    /// Erase all aggregated data.
    Clear,

    /// Remove one course's metrics.
    ClearCourse {
        /// The course ID to remove.
        course_id: String,
    },

    /// Request a risk prediction from the backend.
    Predict {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_clear_course() {
        let cli = Cli::parse_from(["aq", "clear-course", "101"]);
        assert!(matches!(
            cli.command,
            Some(Commands::ClearCourse { course_id }) if course_id == "101"
        ));
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["aq", "export", "--pretty", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Export { pretty: true })));
    }
}
