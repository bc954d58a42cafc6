use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aq_cli::commands::{clear, export, ingest, predict, show, status};
use aq_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Ingest { file } => ingest::run(&mut stdout, &config, file.as_deref())?,
        Commands::Status => status::run(&mut stdout, &config)?,
        Commands::Show => show::run(&mut stdout, &config)?,
        Commands::Export { pretty } => export::run(&mut stdout, &config, *pretty)?,
        Commands::Clear => clear::run(&mut stdout, &config)?,
        Commands::ClearCourse { course_id } => clear::run_course(&mut stdout, &config, course_id)?,
        Commands::Predict { json } => predict::run(&mut stdout, &config, *json)?,
    }

    Ok(())
}
