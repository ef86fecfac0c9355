//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use tokdrop_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "tokdrop")]
#[command(version)]
#[command(about = "Replies to TikTok links in Telegram chats with the video")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the Telegram bot (long-polling)
    Bot,
    /// Download the video behind a link and print where it was saved
    Fetch {
        /// TikTok link, short or canonical
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Print the TikTok links found in some text
    Links {
        /// Text to scan; multiple arguments are joined with spaces
        #[arg(value_name = "TEXT", required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Write the default config file
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bot => run_with_config(tokdrop_bot::run),
        Commands::Fetch { url } => {
            run_with_config(|config| async move { commands::fetch::run(&url, &config).await })
        }
        Commands::Links { text } => {
            commands::links::run(&text.join(" "));
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

/// Loads config, installs logging and drives `f` on a fresh runtime.
fn run_with_config<F, Fut>(f: F) -> Result<()>
where
    F: FnOnce(config::Config) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let config = config::Config::load().context("load config")?;
    let _log_guard = logging::init(&config.log)?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(f(config))
}
