//! taskloop CLI, the main entry point.
//!
//! Commands:
//! - `run`     Run one task, or an interactive session on one conversation
//! - `serve`   Start the HTTP gateway
//! - `tools`   List the tools the configured backend offers
//! - `config`  Print the effective (or default) configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskloop",
    about = "taskloop: answer tasks with an LLM and MCP tools",
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
    /// Run a task through the agent loop
    Run {
        /// Run a single task instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation session id (used with `scope = "per_session"`)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the tools of the configured backend
    Tools,

    /// Print the configuration as TOML
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { message, session } => commands::run::run(message, session).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Config { default } => commands::config_cmd::show(default)?,
    }

    Ok(())
}
