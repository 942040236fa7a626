//! Threadline CLI: the main entry point.
//!
//! Commands:
//! - `chat`     Terminal chat session with thread management
//! - `gateway`  Serve the web chat UI
//! - `threads`  List saved threads
//! - `onboard`  Write a default config
//! - `doctor`   Diagnose setup problems

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "threadline",
    about = "Threadline: a tool-using chat assistant with persistent threads",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat in the terminal
    Chat {
        /// Start in temporary mode (nothing is saved)
        #[arg(short, long)]
        temporary: bool,
    },

    /// Start the web chat server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List saved threads
    Threads,

    /// Write a default configuration file
    Onboard,

    /// Diagnose configuration and storage
    Doctor,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "threadline=debug,tower_http=debug"
    } else {
        "threadline=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat { temporary } => commands::chat::run(temporary)?,
        Commands::Gateway { port } => commands::gateway::run(port)?,
        Commands::Threads => commands::threads::run()?,
        Commands::Onboard => commands::onboard::run()?,
        Commands::Doctor => commands::doctor::run()?,
    }

    Ok(())
}
