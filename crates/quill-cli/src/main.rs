//! Quill CLI - generative computation notebooks.

mod colors;
mod new;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Generative computation notebook kernel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notebook headlessly
    Run {
        /// Path to the notebook document (.json)
        notebook: String,

        /// Run only a specific cell (and its dependencies)
        #[arg(long)]
        cell: Option<String>,

        /// Re-evaluate cells that already have outputs
        #[arg(long)]
        force: bool,
    },

    /// Create a new notebook from template
    New {
        /// Path for the new notebook document
        path: String,

        /// Notebook title
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            notebook,
            cell,
            force,
        } => run::execute(&notebook, cell.as_deref(), force).await?,

        Commands::New { path, title } => new::execute(&path, title.as_deref())?,
    }

    Ok(())
}
