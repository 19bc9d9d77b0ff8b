use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "flashdeck", version, about = "Flashdeck effect engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Player level and XP
    Progress {
        #[command(subcommand)]
        action: commands::progress::ProgressAction,
    },
    /// Run a session on a virtual clock and print its events as JSON lines
    Simulate(commands::simulate::SimulateArgs),
    /// Run a headless session in real time with the watchers attached
    Run(commands::run::RunArgs),
}

fn main() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Progress { action } => commands::progress::run(action),
        Commands::Simulate(args) => commands::simulate::run(args),
        Commands::Run(args) => commands::run::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
