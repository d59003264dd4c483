use std::path::PathBuf;

use clap::{Parser, Subcommand};

use library_gate::config::loader::{load_env_file, load_from_process, ConfigError};
use library_gate::config::Configuration;

#[derive(Parser)]
#[command(name = "config-check")]
#[command(about = "Validate the library backend environment without starting it", long_about = None)]
struct Cli {
    /// Read variables from this env file instead of the process environment
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Let process variables override the env file
    #[arg(long, requires = "env_file")]
    with_process_env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report every violation, exit non-zero if any
    Validate,
    /// Print the validated configuration with secrets redacted
    Show,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = match &cli.env_file {
        Some(path) => load_env_file(path, cli.with_process_env),
        None => load_from_process().map_err(ConfigError::from),
    };

    let config = match loaded {
        Ok(config) => config,
        Err(ConfigError::Invalid(e)) => {
            eprintln!("{} violation(s):", e.violations().len());
            for violation in e.violations() {
                eprintln!("  - {}", violation);
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    match cli.command {
        Commands::Validate => print_summary(&config),
        Commands::Show => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

fn print_summary(config: &Configuration) {
    println!("Configuration OK");
    println!("  environment: {}", config.environment);
    println!("  listen:      {}", config.bind_address());
    println!("  cors origin: {}", config.cors.allowed_origin);
    println!(
        "  rate limit:  {} requests / {} min",
        config.rate_limit.max_requests, config.rate_limit.window_minutes
    );
}
