use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lab_core::model::LabId;
use services::{AppServices, ClientConfig, Clock};

mod render;
mod repl;

const DEFAULT_LOG_FILTER: &str = "labdesk=info,services=info";

#[derive(Parser)]
#[command(name = "labdesk", version, about = "Work through practical labs from the terminal")]
struct Cli {
    /// Use the built-in course instead of the lab server.
    #[arg(long, global = true)]
    offline: bool,

    /// Drafts database, as a `sqlite://` URL or a file path.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the available labs
    Labs,

    /// Show progress across all labs
    Dashboard,

    /// Open a lab and work on it interactively
    Open { lab_id: u64 },
}

impl Command {
    fn needs_account(&self) -> bool {
        !matches!(self, Command::Labs)
    }
}

fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_string();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Create the database file and its directory so `SQLite` can open it.
fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid drafts database url: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid drafts database url: {db_url}");
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
    }
    Ok(())
}

async fn build_services(cli: &Cli, mut config: ClientConfig) -> Result<AppServices> {
    let clock = Clock::default_clock();
    if cli.offline {
        return Ok(AppServices::new_offline(config, clock).await?);
    }

    if let Some(db) = &cli.db {
        config.drafts_db_url = db.clone();
    }
    config.drafts_db_url = normalize_sqlite_url(&config.drafts_db_url);
    prepare_sqlite_file(&config.drafts_db_url)?;

    let services = AppServices::new_http(config, clock)
        .await
        .context("connecting to the lab server")?;
    if cli.cmd.needs_account() && services.account().is_none() {
        bail!(
            "no credentials configured: set LABDESK__USERNAME and LABDESK__PASSWORD, or use --offline"
        );
    }
    Ok(services)
}

async fn run(cli: Cli) -> Result<()> {
    let config = ClientConfig::load().context("loading configuration")?;
    let services = build_services(&cli, config).await?;
    if let Some(account) = services.account() {
        info!(user = %account.username, "signed in as {}", account.name);
    }
    let lab_loop = services.lab_loop();

    match cli.cmd {
        Command::Labs => {
            let labs = lab_loop.list_labs().await?;
            print!("{}", render::lab_list(&labs));
        }
        Command::Dashboard => {
            let dashboard = lab_loop.dashboard().await?;
            print!("{}", render::dashboard(&dashboard));
        }
        Command::Open { lab_id } => {
            let mut lab = lab_loop.open_lab(LabId::new(lab_id)).await?;
            if let Err(err) = lab_loop.start_lab(&mut lab).await {
                eprintln!("cannot start this lab: {}", err.user_message());
            }
            repl::run(&lab_loop, &mut lab).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_urls_are_made_absolute() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/drafts.sqlite3"),
            "sqlite:///tmp/drafts.sqlite3"
        );
        assert_eq!(
            normalize_sqlite_url("/var/lib/labdesk/drafts.sqlite3"),
            "sqlite:///var/lib/labdesk/drafts.sqlite3"
        );
        assert!(normalize_sqlite_url("drafts.sqlite3").ends_with("/drafts.sqlite3"));
    }

    #[test]
    fn open_requires_an_account() {
        let cli = Cli::parse_from(["labdesk", "open", "2", "--offline"]);
        assert!(cli.offline);
        assert!(cli.cmd.needs_account());
        assert!(!Command::Labs.needs_account());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
