//! # Brainstormer CLI
//!
//! ## Usage
//!
//! ```bash
//! brainstormer --config ./config/brainstormer.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brainstormer init` | Create the SQLite database and run schema migrations |
//! | `brainstormer project create <name> --owner <id>` | Create a project |
//! | `brainstormer project list --owner <id>` | List a caller's projects |
//! | `brainstormer serve` | Start the HTTP server |
//! | `brainstormer suggest "<query>" --project <id> --owner <id>` | Stream suggestions to stdout |
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Logs go to stderr so
//! `suggest` output stays pipeable.

use brainstormer::{config, migrate, orchestrator, projects, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Brainstormer: streaming keyword suggestions for brainstorming projects.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/brainstormer.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "brainstormer", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brainstormer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again leaves existing projects untouched.
    Init,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Start the HTTP server.
    ///
    /// Serves `POST /search/stream`, `POST /search` and `GET /health` on `[server].bind`.
    Serve,

    /// Run one suggestion stream and print its SSE frames.
    Suggest {
        /// Seed phrases, `+`-separated (e.g. `"coffee+pastry"`).
        query: String,

        /// Project id to run under.
        #[arg(long)]
        project: String,

        /// Caller id that owns the project.
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project owned by `--owner`.
    Create {
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// List projects owned by `--owner`, most recently updated first.
    List {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Create { name, owner } => {
                projects::run_project_create(&cfg, &name, &owner).await?;
            }
            ProjectAction::List { owner } => {
                projects::run_project_list(&cfg, &owner).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Suggest {
            query,
            project,
            owner,
        } => {
            orchestrator::run_suggest(&cfg, &query, &project, &owner).await?;
        }
    }

    Ok(())
}
