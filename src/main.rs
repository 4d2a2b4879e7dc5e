use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tutorstream::config::{CliOverrides, Config};

mod cmd;

#[derive(Parser)]
#[command(name = "tutorstream")]
#[command(version, about = "Streaming tutor conversations and file completion sessions")]
pub struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Backend base URL. Overrides tutorstream.toml and TUTORSTREAM_API_URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Number of recent messages sent as conversation memory.
    #[arg(long, global = true)]
    pub context_window: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .tutorstream directory with a default config
    Init,
    /// Ask a question (interactive when no prompt is given)
    Chat {
        prompt: Option<String>,
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Print the stored conversation
    History,
    /// Merge the backend's authoritative history into the local conversation
    Sync {
        /// Keep polling on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Replace the text of a message
    Edit { id: String, text: String },
    /// Delete a message
    Remove { id: String },
    /// React to a message (up or down)
    React { id: String, reaction: String },
    /// Forget the whole conversation
    Clear {
        #[arg(long)]
        force: bool,
    },
    /// Open an interactive completion session for a file
    Complete { file_id: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default tutorstream.toml file
    Init,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            api_url: self.api_url.clone(),
            context_window: self.context_window,
            no_stream: matches!(self.command, Commands::Chat { no_stream: true, .. }),
        }
    }

    fn load_config(&self, project_dir: PathBuf) -> Result<Config> {
        Config::new(project_dir, self.verbose, &self.overrides())
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "tutorstream=debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Chat { prompt, .. } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_chat(&config, prompt.as_deref()).await?;
        }
        Commands::History => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_history(&config).await?;
        }
        Commands::Sync { watch } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_sync(&config, *watch).await?;
        }
        Commands::Edit { id, text } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_edit(&config, id, text).await?;
        }
        Commands::Remove { id } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_remove(&config, id).await?;
        }
        Commands::React { id, reaction } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_react(&config, id, reaction).await?;
        }
        Commands::Clear { force } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_clear(&config, *force).await?;
        }
        Commands::Complete { file_id } => {
            let config = cli.load_config(project_dir)?;
            cmd::cmd_complete(&config, file_id).await?;
        }
    }

    Ok(())
}
