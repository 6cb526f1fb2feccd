mod config;
mod console;
mod docker;
mod history;
mod server;
mod shared;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "craftpanel-console")]
#[command(about = "Craftpanel - real-time console service for Minecraft server containers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the console streaming service
    Serve {
        /// Host to bind
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to a YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = shared::logging::init("./logs", "craftpanel-console");

    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        config: None,
    });

    match command {
        Commands::Serve { host, port, config } => server::run::run(host, port, config).await?,
    }

    Ok(())
}
